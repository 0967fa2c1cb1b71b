use crate::error::{ConnectionError, SealingError};
use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use keynesis::{
    hash::Blake2b,
    key::ed25519::PublicKey,
    noise::{TransportReceiveHalf, TransportSendHalf},
};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

const MAC_LENGTH: usize = 16;
const MIN_FRAME_LENGTH: usize = MAC_LENGTH;
const HEAD_LENGTH: usize = std::mem::size_of::<u16>();
pub(crate) const MAX_FRAME_LENGTH: usize = u16::MAX as usize - HEAD_LENGTH;

/// the largest plaintext that fits in a single sealed frame
pub const MAX_SEALED_PAYLOAD: usize = MAX_FRAME_LENGTH - MAC_LENGTH;

/**
# Sealing half of the secure channel

every item is sealed (encrypted and authenticated) into one frame:
the length of the sealed data as a big endian `u16` followed by the
ciphertext and its 16 bytes MAC.
*/
pub(crate) struct SecureEncoder {
    noise: TransportSendHalf<Blake2b>,
}

/**
# Unsealing half of the secure channel

decodes the frames of the [`SecureEncoder`] of the remote peer. The
frames must be unsealed in the order they have been sealed, any failure to
authenticate a frame is reported as a [`SealingError`].
*/
pub(crate) struct SecureDecoder {
    noise: TransportReceiveHalf<Blake2b>,
    decode_state: State,
}

/// state of the data being read
///
/// initially we expect the [`State::Head`] which has a pre-determined
/// size and contains the size of the sealed data to read. Once read,
/// the state is [`State::Data`] until the whole frame is available.
enum State {
    Data(usize),
    Head,
}

impl SecureEncoder {
    pub(crate) fn new(noise: TransportSendHalf<Blake2b>) -> Self {
        Self { noise }
    }

    pub(crate) fn remote_public_identity(&self) -> &PublicKey {
        self.noise.remote_public_identity()
    }
}

impl SecureDecoder {
    pub(crate) fn new(noise: TransportReceiveHalf<Blake2b>) -> Self {
        Self {
            noise,
            decode_state: State::Head,
        }
    }

    fn decode_head(&mut self, src: &mut BytesMut) -> Result<Option<usize>, ConnectionError> {
        if src.len() < HEAD_LENGTH {
            return Ok(None);
        }

        let n = src.get_u16() as usize;

        if !(MIN_FRAME_LENGTH..=MAX_FRAME_LENGTH).contains(&n) {
            return Err(SealingError::InvalidLength(n).into());
        }

        src.reserve(n);

        Ok(Some(n))
    }

    fn decode_data(
        &mut self,
        n: usize,
        src: &mut BytesMut,
    ) -> Result<Option<BytesMut>, ConnectionError> {
        if src.len() < n {
            return Ok(None);
        }

        let bytes = src.split_to(n);
        let mut output = vec![0; n - MAC_LENGTH];

        self.noise
            .receive(bytes.as_ref(), &mut output)
            .map_err(|error| SealingError::Unseal(error.to_string()))?;

        Ok(Some(BytesMut::from(output.as_slice())))
    }
}

impl Decoder for SecureDecoder {
    type Item = BytesMut;
    type Error = ConnectionError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let n = match self.decode_state {
            State::Head => match self.decode_head(src)? {
                Some(n) => {
                    self.decode_state = State::Data(n);
                    n
                }
                None => return Ok(None),
            },
            State::Data(n) => n,
        };

        match self.decode_data(n, src)? {
            Some(data) => {
                self.decode_state = State::Head;
                src.reserve(HEAD_LENGTH);
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() && matches!(self.decode_state, State::Head) => Ok(None),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed in the middle of a sealed frame",
            )
            .into()),
        }
    }
}

impl Encoder<Bytes> for SecureEncoder {
    type Error = ConnectionError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_SEALED_PAYLOAD {
            return Err(ConnectionError::FrameTooLarge(item.len()));
        }

        let n = item.len() + MAC_LENGTH;

        let mut output = vec![0; n];
        self.noise
            .send(item.as_ref(), &mut output)
            .map_err(|error| SealingError::Seal(error.to_string()))?;

        dst.reserve(HEAD_LENGTH + n);
        dst.put_u16(n as u16);
        dst.extend_from_slice(output.as_ref());

        Ok(())
    }
}
