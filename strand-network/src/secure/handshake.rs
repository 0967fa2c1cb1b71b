use crate::{
    error::NegotiationError,
    secure::codec::{SecureDecoder, SecureEncoder},
    wire::Wire,
    SecureChannel,
};
use keynesis::{
    hash::Blake2b,
    key::ed25519::{PublicKey, SecretKey},
    noise::{ik::A, TransportState, IK},
};
use rand_core::OsRng;
use std::net::SocketAddr;

/// size of the initiator's message: ephemeral key, sealed static key and
/// the sealed empty payload
const INITIATE_SIZE: usize = PublicKey::SIZE + (PublicKey::SIZE + 16) + 16;

/// size of the responder's message: ephemeral key and the sealed empty
/// payload
const RESPONSE_SIZE: usize = PublicKey::SIZE + 16;

fn handshake_error(error: impl std::fmt::Display) -> NegotiationError {
    NegotiationError::Handshake(error.to_string())
}

fn split(state: TransportState<Blake2b>) -> (SecureEncoder, SecureDecoder) {
    let (send, receive) = state.split();
    (SecureEncoder::new(send), SecureDecoder::new(receive))
}

/// initiate the secure channel with the remote peer
///
/// the remote's public identity must have been registered already in the
/// [`SecureChannel`]. The `transcript` (the negotiation envelopes as they
/// have been exchanged) is the handshake prologue: both sides must agree on
/// it or the handshake fails.
pub(crate) async fn initiate(
    wire: &mut Wire,
    secure: &SecureChannel,
    remote: SocketAddr,
    transcript: &[u8],
) -> Result<(SecureEncoder, SecureDecoder), NegotiationError> {
    let rs = secure.inbound(remote)?;

    let mut message = [0; INITIATE_SIZE];
    let ik: IK<SecretKey, Blake2b, OsRng, A> = IK::new(OsRng, transcript);

    let state = ik
        .initiate(secure.outbound(), rs, &mut message[..])
        .map_err(handshake_error)?;

    wire.write_raw(&message);
    wire.flush().await?;

    let mut response = [0; RESPONSE_SIZE];
    wire.read_exact(&mut response).await?;

    let state = state
        .receive(secure.outbound(), &response)
        .map_err(handshake_error)?;

    tracing::debug!(peer = %remote, id = %rs, "secure channel established");

    Ok(split(state))
}

/// respond to the secure channel handshake of the remote peer
///
/// the initiator's static key must be the one registered for its address
/// in the [`SecureChannel`], otherwise the peer is rejected.
pub(crate) async fn respond(
    wire: &mut Wire,
    secure: &SecureChannel,
    remote: SocketAddr,
    transcript: &[u8],
) -> Result<(SecureEncoder, SecureDecoder), NegotiationError> {
    let mut message = [0; INITIATE_SIZE];
    wire.read_exact(&mut message).await?;

    let ik: IK<SecretKey, Blake2b, OsRng, A> = IK::new(OsRng, transcript);
    let state = ik
        .receive(secure.outbound(), &message)
        .map_err(handshake_error)?;

    let expected = secure.inbound(remote)?;
    let identity = *state.remote_public_identity();
    if identity != expected {
        return Err(NegotiationError::Rejected(identity));
    }

    let mut response = [0; RESPONSE_SIZE];
    let mut output: &mut [u8] = &mut response[..];
    let state = state.reply(&mut output).map_err(handshake_error)?;

    wire.write_raw(&response);
    wire.flush().await?;

    tracing::debug!(peer = %remote, id = %identity, "secure channel established");

    Ok(split(state))
}
