/*!
# upgrade negotiation

the first thing exchanged on a raw stream, before any application data:

1. the dialer sends its [`NegotiationEnvelope`]: the upgrades it supports
   in its preferred order and, if it offers the secure channel, its public
   identity (the channel material);
2. the listener always replies with its own envelope;
3. both sides keep the upgrades they have in common (in their local order).
   Nothing in common is a [`Resolution::Bare`] connection;
4. if the secure channel is resolved, each side registers the other's
   channel material and the dialer initiates the [Noise **IK**] handshake.
   Both envelopes, as exchanged, are the prologue of the handshake so a
   tampered negotiation fails the handshake.

A listener receiving anything else than an envelope as first frame treats
the stream as bare and keeps the frame for the application.

[Noise **IK**]: https://noiseexplorer.com/patterns/IK/
*/

use crate::{
    envelope::{Frame, NegotiationEnvelope},
    error::NegotiationError,
    secure::{
        codec::{SecureDecoder, SecureEncoder},
        handshake,
    },
    wire::{AsyncStream, Wire},
    Connection, UpgradeKind, Upgrades,
};
use bytes::{BufMut as _, Bytes, BytesMut};
use keynesis::key::ed25519::PublicKey;
use std::{fmt, io, net::SocketAddr};
use tokio_util::codec::LengthDelimitedCodec;

/// outcome of the negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// no upgrade in common, the stream is used as is
    Bare,
    /// the upgrades both peers agreed on, in the local order. Never empty.
    Resolved(Vec<UpgradeKind>),
}

/// the negotiated wire, ready to be turned into a [`Connection`]
pub(crate) struct Negotiated {
    pub(crate) wire: Wire,
    pub(crate) resolution: Resolution,
    pub(crate) secure: Option<(SecureEncoder, SecureDecoder)>,
}

impl Resolution {
    fn from_upgrades(upgrades: Vec<UpgradeKind>) -> Self {
        if upgrades.is_empty() {
            Self::Bare
        } else {
            Self::Resolved(upgrades)
        }
    }

    pub fn is_bare(&self) -> bool {
        matches!(self, Self::Bare)
    }

    pub fn upgrades(&self) -> &[UpgradeKind] {
        match self {
            Self::Bare => &[],
            Self::Resolved(upgrades) => upgrades.as_slice(),
        }
    }

    pub fn contains(&self, kind: UpgradeKind) -> bool {
        self.upgrades().contains(&kind)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bare => f.write_str("bare"),
            Self::Resolved(upgrades) => {
                f.write_str("{")?;
                for (index, upgrade) in upgrades.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", upgrade)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// negotiate the upgrades on a stream we opened to `remote`
///
/// if `expected` is set (the public key of the dialed address) the remote
/// peer must present this identity as its channel material.
pub async fn dial<S>(
    stream: S,
    upgrades: &Upgrades,
    remote: SocketAddr,
    expected: Option<PublicKey>,
) -> Result<Connection, NegotiationError>
where
    S: AsyncStream + 'static,
{
    let negotiated = dial_wire(Wire::new(stream), upgrades, remote, expected).await?;
    Ok(Connection::negotiated(negotiated, remote))
}

/// negotiate the upgrades on a stream `remote` opened to us
pub async fn accept<S>(
    stream: S,
    upgrades: &Upgrades,
    remote: SocketAddr,
) -> Result<Connection, NegotiationError>
where
    S: AsyncStream + 'static,
{
    let negotiated = accept_wire(Wire::new(stream), upgrades, remote).await?;
    Ok(Connection::negotiated(negotiated, remote))
}

#[tracing::instrument(skip(wire, upgrades, expected), level = "debug")]
async fn dial_wire(
    mut wire: Wire,
    upgrades: &Upgrades,
    remote: SocketAddr,
    expected: Option<PublicKey>,
) -> Result<Negotiated, NegotiationError> {
    let mut codec = LengthDelimitedCodec::new();

    let offer = encode_envelope(upgrades.envelope())?;
    wire.write_frame(&mut codec, offer.clone())?;
    wire.flush().await?;

    let reply = wire
        .read_frame(&mut codec)
        .await?
        .ok_or_else(|| closed("waiting for the negotiation reply"))?
        .freeze();
    let Frame::Negotiation(envelope) =
        Frame::decode(&reply).map_err(NegotiationError::InvalidEnvelope)?;

    let resolution = Resolution::from_upgrades(upgrades.intersect(&envelope.offered_upgrades));
    tracing::debug!(resolution = %resolution, "negotiated");

    let secure = match upgrades.secure_channel() {
        Some(channel) if resolution.contains(UpgradeKind::SecureChannel) => {
            let material = envelope
                .channel_material
                .ok_or(NegotiationError::MissingChannelMaterial)?
                .public_key()?;

            if let Some(expected) = expected {
                if expected != material {
                    return Err(NegotiationError::IdentityMismatch {
                        expected,
                        received: material,
                    });
                }
            }

            channel.register_inbound(remote, material);

            let prologue = transcript(&offer, &reply);
            Some(handshake::initiate(&mut wire, channel, remote, &prologue).await?)
        }
        _ => None,
    };

    Ok(Negotiated {
        wire,
        resolution,
        secure,
    })
}

#[tracing::instrument(skip(wire, upgrades), level = "debug")]
async fn accept_wire(
    mut wire: Wire,
    upgrades: &Upgrades,
    remote: SocketAddr,
) -> Result<Negotiated, NegotiationError> {
    let mut codec = LengthDelimitedCodec::new();

    let offer = wire
        .read_frame(&mut codec)
        .await?
        .ok_or_else(|| closed("waiting for the negotiation offer"))?
        .freeze();

    let envelope = match Frame::decode(&offer) {
        Ok(Frame::Negotiation(envelope)) => envelope,
        Err(error) => {
            tracing::debug!(reason = %error, "no negotiation envelope, keeping the stream bare");
            wire.unread_frame(&mut codec, offer)?;
            return Ok(Negotiated {
                wire,
                resolution: Resolution::Bare,
                secure: None,
            });
        }
    };

    let reply = encode_envelope(upgrades.envelope())?;
    wire.write_frame(&mut codec, reply.clone())?;
    wire.flush().await?;

    let resolution = Resolution::from_upgrades(upgrades.intersect(&envelope.offered_upgrades));
    tracing::debug!(resolution = %resolution, "negotiated");

    let secure = match upgrades.secure_channel() {
        Some(channel) if resolution.contains(UpgradeKind::SecureChannel) => {
            let material = envelope
                .channel_material
                .ok_or(NegotiationError::MissingChannelMaterial)?
                .public_key()?;
            channel.register_inbound(remote, material);

            let prologue = transcript(&offer, &reply);
            Some(handshake::respond(&mut wire, channel, remote, &prologue).await?)
        }
        _ => {
            if envelope.channel_material.is_some() {
                tracing::debug!("secure channel not resolved, ignoring the channel material");
            }
            None
        }
    };

    Ok(Negotiated {
        wire,
        resolution,
        secure,
    })
}

fn encode_envelope(envelope: NegotiationEnvelope) -> Result<Bytes, NegotiationError> {
    Frame::Negotiation(envelope)
        .encode()
        .map(Bytes::from)
        .map_err(NegotiationError::InvalidEnvelope)
}

/// the offer and the reply, each prefixed with its length
fn transcript(offer: &[u8], reply: &[u8]) -> Vec<u8> {
    let mut transcript = BytesMut::with_capacity(8 + offer.len() + reply.len());
    transcript.put_u32(offer.len() as u32);
    transcript.extend_from_slice(offer);
    transcript.put_u32(reply.len() as u32);
    transcript.extend_from_slice(reply);
    transcript.to_vec()
}

fn closed(context: &'static str) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("stream closed {}", context),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{secure::tests::secret, SecureChannel, Upgrade};
    use std::sync::Arc;

    pub(crate) fn dialer_address() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40001))
    }

    pub(crate) fn listener_address() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 9001))
    }

    pub(crate) fn secure_upgrades(seed: u64) -> (Upgrades, Arc<SecureChannel>) {
        let channel = Arc::new(SecureChannel::new(secret(seed)));
        (
            Upgrades::from(Upgrade::SecureChannel(Arc::clone(&channel))),
            channel,
        )
    }

    /// negotiate both ends of an in memory stream
    pub(crate) async fn pair(
        dialer: &Upgrades,
        listener: &Upgrades,
    ) -> (
        Result<Connection, NegotiationError>,
        Result<Connection, NegotiationError>,
    ) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        tokio::join!(
            dial(a, dialer, listener_address(), None),
            accept(b, listener, dialer_address()),
        )
    }

    #[tokio::test]
    async fn both_secure() {
        let (dialer, dialer_channel) = secure_upgrades(1);
        let (listener, listener_channel) = secure_upgrades(2);

        let (dialed, accepted) = pair(&dialer, &listener).await;
        let (dialed, accepted) = (dialed.unwrap(), accepted.unwrap());

        let expected = Resolution::Resolved(vec![UpgradeKind::SecureChannel]);
        assert_eq!(dialed.resolution(), &expected);
        assert_eq!(accepted.resolution(), &expected);
        assert!(dialed.is_secure());
        assert!(accepted.is_secure());

        assert_eq!(
            dialer_channel.inbound(listener_address()).unwrap(),
            *listener_channel.public_identity()
        );
        assert_eq!(
            listener_channel.inbound(dialer_address()).unwrap(),
            *dialer_channel.public_identity()
        );
        assert_eq!(
            dialed.remote_public_identity(),
            Some(listener_channel.public_identity())
        );
    }

    #[tokio::test]
    async fn dialer_without_upgrades() {
        let (listener, _) = secure_upgrades(2);

        let (dialed, accepted) = pair(&Upgrades::new(), &listener).await;

        assert_eq!(dialed.unwrap().resolution(), &Resolution::Bare);
        assert_eq!(accepted.unwrap().resolution(), &Resolution::Bare);
    }

    #[tokio::test]
    async fn listener_without_upgrades() {
        let (dialer, channel) = secure_upgrades(1);

        let (dialed, accepted) = pair(&dialer, &Upgrades::new()).await;

        assert_eq!(dialed.unwrap().resolution(), &Resolution::Bare);
        assert_eq!(accepted.unwrap().resolution(), &Resolution::Bare);
        assert_eq!(channel.registered(), 0);
    }

    #[tokio::test]
    async fn dialed_identity_must_match() {
        let (dialer, _) = secure_upgrades(1);
        let (listener, _) = secure_upgrades(2);
        let (a, b) = tokio::io::duplex(64 * 1024);

        let (dialed, _) = tokio::join!(
            dial(
                a,
                &dialer,
                listener_address(),
                Some(secret(3).public_key())
            ),
            accept(b, &listener, dialer_address()),
        );

        assert!(matches!(
            dialed,
            Err(NegotiationError::IdentityMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn missing_channel_material() {
        let (listener, _) = secure_upgrades(2);
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut a = Wire::new(a);
        let mut codec = LengthDelimitedCodec::new();

        let accepting = tokio::spawn(async move {
            accept(b, &listener, dialer_address()).await.map(|_| ())
        });

        // offering the secure channel without any material
        a.write_frame(
            &mut codec,
            Bytes::from_static(br#"{"tag":"NEGOTIATION","offeredUpgrades":[{"tag":"SECURE_CHANNEL"}]}"#),
        )
        .unwrap();
        a.flush().await.unwrap();

        assert!(matches!(
            accepting.await.unwrap(),
            Err(NegotiationError::MissingChannelMaterial)
        ));
    }

    #[tokio::test]
    async fn unused_channel_material_is_ignored() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut a = Wire::new(a);
        let mut codec = LengthDelimitedCodec::new();

        let accepting = tokio::spawn(async move {
            let (listener, channel) = secure_upgrades(2);
            let accepted = accept(b, &listener, dialer_address()).await;
            (accepted, channel.registered())
        });

        // nothing in common and material that is not a key
        a.write_frame(
            &mut codec,
            Bytes::from_static(
                br#"{"tag":"NEGOTIATION","offeredUpgrades":[{"tag":"COMPRESSION"}],"channelMaterial":"00ff"}"#,
            ),
        )
        .unwrap();
        a.flush().await.unwrap();

        let (accepted, registered) = accepting.await.unwrap();
        assert!(accepted.unwrap().resolution().is_bare());
        assert_eq!(registered, 0);
    }

    #[tokio::test]
    async fn invalid_reply() {
        let (dialer, _) = secure_upgrades(1);
        let (a, b) = tokio::io::duplex(64 * 1024);
        let mut b = Wire::new(b);
        let mut codec = LengthDelimitedCodec::new();

        let dialing =
            tokio::spawn(async move { dial(a, &dialer, listener_address(), None).await.map(|_| ()) });

        b.read_frame(&mut codec).await.unwrap().unwrap();
        b.write_frame(&mut codec, Bytes::from_static(b"{}")).unwrap();
        b.flush().await.unwrap();

        assert!(matches!(
            dialing.await.unwrap(),
            Err(NegotiationError::InvalidEnvelope(_))
        ));
    }

    #[tokio::test]
    async fn closed_before_reply() {
        let (dialer, _) = secure_upgrades(1);
        let (a, b) = tokio::io::duplex(64 * 1024);
        drop(b);

        assert!(matches!(
            dial(a, &dialer, listener_address(), None).await,
            Err(NegotiationError::Io(_))
        ));
    }

    #[test]
    fn display_resolution() {
        assert_eq!(Resolution::Bare.to_string(), "bare");
        assert_eq!(
            Resolution::Resolved(vec![UpgradeKind::SecureChannel]).to_string(),
            "{SECURE_CHANNEL}"
        );
    }
}
