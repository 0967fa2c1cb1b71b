use bytes::{Buf as _, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio_util::codec::{Decoder, Encoder};

const READ_CHUNK: usize = 8 * 1024;

/// any bidirectional byte stream a [`Connection`] can be built on
///
/// [`Connection`]: crate::Connection
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// a raw stream with its read and write buffers
///
/// the negotiation, the handshake and the connection all read and write
/// through the same buffers so no byte read ahead by one layer is lost
/// for the next one.
pub(crate) struct Wire {
    stream: Box<dyn AsyncStream>,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
}

impl Wire {
    pub(crate) fn new<S>(stream: S) -> Self
    where
        S: AsyncStream + 'static,
    {
        Self {
            stream: Box::new(stream),
            read_buffer: BytesMut::with_capacity(READ_CHUNK),
            write_buffer: BytesMut::new(),
        }
    }

    /// read more bytes from the stream into the read buffer
    ///
    /// returns `0` at the end of the stream
    async fn fill(&mut self) -> io::Result<usize> {
        self.read_buffer.reserve(READ_CHUNK);
        self.stream.read_buf(&mut self.read_buffer).await
    }

    /// read the next frame
    ///
    /// returns `None` if the stream ended cleanly between 2 frames
    pub(crate) async fn read_frame<D>(&mut self, decoder: &mut D) -> Result<Option<D::Item>, D::Error>
    where
        D: Decoder,
    {
        loop {
            if let Some(frame) = decoder.decode(&mut self.read_buffer)? {
                return Ok(Some(frame));
            }

            if self.fill().await? == 0 {
                if self.read_buffer.is_empty() {
                    // the decoder may be holding the head of a frame
                    return decoder.decode_eof(&mut self.read_buffer);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed in the middle of a frame",
                )
                .into());
            }
        }
    }

    /// put a frame back in front of the read buffer
    pub(crate) fn unread_frame<E, I>(&mut self, encoder: &mut E, frame: I) -> Result<(), E::Error>
    where
        E: Encoder<I>,
    {
        let mut buffer = BytesMut::with_capacity(self.read_buffer.len() + READ_CHUNK);
        encoder.encode(frame, &mut buffer)?;
        buffer.extend_from_slice(&self.read_buffer);
        self.read_buffer = buffer;
        Ok(())
    }

    pub(crate) fn write_frame<E, I>(&mut self, encoder: &mut E, frame: I) -> Result<(), E::Error>
    where
        E: Encoder<I>,
    {
        encoder.encode(frame, &mut self.write_buffer)
    }

    pub(crate) fn write_raw(&mut self, bytes: &[u8]) {
        self.write_buffer.extend_from_slice(bytes);
    }

    /// read exactly `buf.len()` bytes, buffered bytes first
    pub(crate) async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let buffered = self.read_buffer.len().min(buf.len());
        buf[..buffered].copy_from_slice(&self.read_buffer[..buffered]);
        self.read_buffer.advance(buffered);

        if buffered < buf.len() {
            self.stream.read_exact(&mut buf[buffered..]).await?;
        }
        Ok(())
    }

    /// read at most `buf.len()` bytes, buffered bytes first
    ///
    /// returns `0` at the end of the stream
    pub(crate) async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_buffer.is_empty() {
            return self.stream.read(buf).await;
        }

        let n = self.read_buffer.len().min(buf.len());
        buf[..n].copy_from_slice(&self.read_buffer[..n]);
        self.read_buffer.advance(n);
        Ok(n)
    }

    /// write the pending bytes to the stream and flush it
    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        if !self.write_buffer.is_empty() {
            self.stream.write_all(&self.write_buffer).await?;
            self.write_buffer.clear();
        }
        self.stream.flush().await
    }

    pub(crate) async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::codec::LengthDelimitedCodec;

    #[tokio::test]
    async fn frames_and_raw_bytes_share_the_buffer() {
        let (a, b) = tokio::io::duplex(64);
        let mut a = Wire::new(a);
        let mut b = Wire::new(b);
        let mut codec = LengthDelimitedCodec::new();

        a.write_frame(&mut codec, bytes::Bytes::from_static(b"frame"))
            .unwrap();
        a.write_raw(b"raw");
        a.flush().await.unwrap();

        let frame = b.read_frame(&mut codec).await.unwrap().unwrap();
        assert_eq!(&frame[..], b"frame");

        let mut raw = [0; 3];
        b.read_exact(&mut raw).await.unwrap();
        assert_eq!(&raw, b"raw");
    }

    #[tokio::test]
    async fn unread_frame_is_read_first() {
        let (a, b) = tokio::io::duplex(64);
        let mut a = Wire::new(a);
        let mut b = Wire::new(b);
        let mut codec = LengthDelimitedCodec::new();

        a.write_frame(&mut codec, bytes::Bytes::from_static(b"first"))
            .unwrap();
        a.write_frame(&mut codec, bytes::Bytes::from_static(b"second"))
            .unwrap();
        a.flush().await.unwrap();

        let first = b.read_frame(&mut codec).await.unwrap().unwrap();
        b.unread_frame(&mut codec, first.freeze()).unwrap();

        let again = b.read_frame(&mut codec).await.unwrap().unwrap();
        assert_eq!(&again[..], b"first");
        let second = b.read_frame(&mut codec).await.unwrap().unwrap();
        assert_eq!(&second[..], b"second");
    }

    #[tokio::test]
    async fn end_of_stream() {
        let (a, b) = tokio::io::duplex(64);
        let mut b = Wire::new(b);
        let mut codec = LengthDelimitedCodec::new();

        drop(a);

        assert!(b.read_frame(&mut codec).await.unwrap().is_none());
    }
}
