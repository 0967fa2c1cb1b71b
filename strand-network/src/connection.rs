use crate::{
    error::ConnectionError,
    negotiate::{Negotiated, Resolution},
    secure::codec::{SecureDecoder, SecureEncoder, MAX_SEALED_PAYLOAD},
    wire::{AsyncStream, Wire},
};
use bytes::{Buf as _, Bytes, BytesMut};
use keynesis::key::ed25519::PublicKey;
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt, io, net::SocketAddr};
use tokio_util::codec::LengthDelimitedCodec;

/**
# A connection with a remote peer

the connection owns the raw stream and, if the secure channel has been
negotiated, the sealing and unsealing halves of the channel. Whatever
the negotiated upgrades the same operations are available:

* bytes: [`write_bytes`] are buffered until [`flush`]. On a secure
  connection the buffered bytes are sealed in as few frames as possible;
* objects: [`write_object`] serializes the value as JSON in exactly one
  frame (sealed on a secure connection) and flushes.

Once [`close`]d every operation fails with [`ConnectionError::Closed`].

[`write_bytes`]: Connection::write_bytes
[`flush`]: Connection::flush
[`write_object`]: Connection::write_object
[`close`]: Connection::close
*/
pub struct Connection {
    wire: Option<Wire>,
    channel: Channel,
    remote_address: Option<SocketAddr>,
    resolution: Resolution,
}

enum Channel {
    Bare(LengthDelimitedCodec),
    Secure {
        encoder: SecureEncoder,
        decoder: SecureDecoder,
        /// written bytes not sealed yet
        pending: BytesMut,
        /// unsealed bytes not read yet
        unsealed: BytesMut,
    },
}

impl Connection {
    /// use the stream as is, without any negotiation
    pub fn bare<S>(stream: S, remote_address: Option<SocketAddr>) -> Self
    where
        S: AsyncStream + 'static,
    {
        Self {
            wire: Some(Wire::new(stream)),
            channel: Channel::Bare(LengthDelimitedCodec::new()),
            remote_address,
            resolution: Resolution::Bare,
        }
    }

    pub(crate) fn negotiated(negotiated: Negotiated, remote_address: SocketAddr) -> Self {
        let Negotiated {
            wire,
            resolution,
            secure,
        } = negotiated;

        let channel = match secure {
            None => Channel::Bare(LengthDelimitedCodec::new()),
            Some((encoder, decoder)) => Channel::Secure {
                encoder,
                decoder,
                pending: BytesMut::new(),
                unsealed: BytesMut::new(),
            },
        };

        Self {
            wire: Some(wire),
            channel,
            remote_address: Some(remote_address),
            resolution,
        }
    }

    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.remote_address
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.channel, Channel::Secure { .. })
    }

    pub fn is_closed(&self) -> bool {
        self.wire.is_none()
    }

    /// the authenticated identity of the remote peer, only available on a
    /// secure connection
    pub fn remote_public_identity(&self) -> Option<&PublicKey> {
        match &self.channel {
            Channel::Bare(_) => None,
            Channel::Secure { encoder, .. } => Some(encoder.remote_public_identity()),
        }
    }

    fn parts(&mut self) -> Result<(&mut Wire, &mut Channel), ConnectionError> {
        let wire = self.wire.as_mut().ok_or(ConnectionError::Closed)?;
        Ok((wire, &mut self.channel))
    }

    pub async fn write_byte(&mut self, byte: u8) -> Result<(), ConnectionError> {
        self.write_bytes(&[byte]).await
    }

    /// returns `None` at the end of the stream
    pub async fn read_byte(&mut self) -> Result<Option<u8>, ConnectionError> {
        let mut byte = [0];
        if self.read_bytes(&mut byte).await? == 0 {
            Ok(None)
        } else {
            Ok(Some(byte[0]))
        }
    }

    pub async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        match self.parts()? {
            (wire, Channel::Bare(_)) => wire.write_raw(bytes),
            (_, Channel::Secure { pending, .. }) => pending.extend_from_slice(bytes),
        }
        Ok(())
    }

    /// read at most `buf.len()` bytes
    ///
    /// returns `0` at the end of the stream
    pub async fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, ConnectionError> {
        let (wire, channel) = self.parts()?;
        if buf.is_empty() {
            return Ok(0);
        }

        match channel {
            Channel::Bare(_) => Ok(wire.read_some(buf).await?),
            Channel::Secure {
                decoder, unsealed, ..
            } => {
                // an empty sealed frame is not the end of the stream
                while unsealed.is_empty() {
                    match wire.read_frame(decoder).await? {
                        Some(frame) => *unsealed = frame,
                        None => return Ok(0),
                    }
                }

                let n = unsealed.len().min(buf.len());
                buf[..n].copy_from_slice(&unsealed[..n]);
                unsealed.advance(n);
                Ok(n)
            }
        }
    }

    pub async fn write_object<T>(&mut self, object: &T) -> Result<(), ConnectionError>
    where
        T: Serialize + ?Sized,
    {
        let json = serde_json::to_vec(object)?;

        let (wire, channel) = self.parts()?;
        match channel {
            Channel::Bare(codec) => {
                if json.len() > codec.max_frame_length() {
                    return Err(ConnectionError::FrameTooLarge(json.len()));
                }
                wire.write_frame(codec, Bytes::from(json))?;
            }
            Channel::Secure {
                encoder, pending, ..
            } => {
                seal_pending(wire, encoder, pending)?;
                wire.write_frame(encoder, Bytes::from(json))?;
            }
        }

        wire.flush().await?;
        Ok(())
    }

    pub async fn read_object<T>(&mut self) -> Result<T, ConnectionError>
    where
        T: DeserializeOwned,
    {
        let (wire, channel) = self.parts()?;
        let frame = match channel {
            Channel::Bare(codec) => wire.read_frame(codec).await?,
            Channel::Secure { decoder, .. } => wire.read_frame(decoder).await?,
        };

        let frame = frame.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by the remote peer",
            )
        })?;

        Ok(serde_json::from_slice(&frame)?)
    }

    pub async fn flush(&mut self) -> Result<(), ConnectionError> {
        let (wire, channel) = self.parts()?;
        if let Channel::Secure {
            encoder, pending, ..
        } = channel
        {
            seal_pending(wire, encoder, pending)?;
        }

        wire.flush().await?;
        Ok(())
    }

    /// flush the pending bytes and shut the stream down
    ///
    /// the stream is released even if the final flush fails. Closing an
    /// already closed connection does nothing.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        let mut wire = match self.wire.take() {
            Some(wire) => wire,
            None => return Ok(()),
        };

        if let Channel::Secure {
            encoder, pending, ..
        } = &mut self.channel
        {
            seal_pending(&mut wire, encoder, pending)?;
        }

        wire.flush().await?;
        wire.shutdown().await?;
        Ok(())
    }
}

fn seal_pending(
    wire: &mut Wire,
    encoder: &mut SecureEncoder,
    pending: &mut BytesMut,
) -> Result<(), ConnectionError> {
    while !pending.is_empty() {
        let n = pending.len().min(MAX_SEALED_PAYLOAD);
        wire.write_frame(encoder, pending.split_to(n).freeze())?;
    }
    Ok(())
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("remote_address", &self.remote_address)
            .field("resolution", &self.resolution)
            .field("closed", &self.is_closed())
            .finish()
    }
}
