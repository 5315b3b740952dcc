use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::error::PeerError;
use super::message::{Handshake, Message, HANDSHAKE_LEN};

/// Frames larger than this are rejected outright. Large enough for a
/// maximum-size piece frame or the bitfield of a very large torrent.
const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Length-prefixed framing over a TCP stream.
///
/// Reads accumulate into a buffer, so `receive` is safe to race in a
/// `select!`: a cancelled read leaves the partial frame buffered for the
/// next call. The read deadline is the caller's liveness window (2x the
/// keepalive interval); exceeding it yields [`PeerError::Timeout`].
pub struct Transport {
    stream: TcpStream,
    read_buf: BytesMut,
    read_timeout: Duration,
}

impl Transport {
    pub fn new(stream: TcpStream, read_timeout: Duration) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(32 * 1024),
            read_timeout,
        }
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    pub async fn send_handshake(&mut self, handshake: &Handshake) -> Result<(), PeerError> {
        timeout(WRITE_TIMEOUT, self.stream.write_all(&handshake.encode()))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    pub async fn receive_handshake(&mut self) -> Result<Handshake, PeerError> {
        self.fill_to(HANDSHAKE_LEN, HANDSHAKE_TIMEOUT).await?;
        let data = self.read_buf.split_to(HANDSHAKE_LEN);
        Handshake::decode(&data)
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), PeerError> {
        timeout(WRITE_TIMEOUT, self.stream.write_all(&message.encode()))
            .await
            .map_err(|_| PeerError::Timeout)??;
        Ok(())
    }

    /// Reads the next frame, keepalives included.
    pub async fn receive(&mut self) -> Result<Message, PeerError> {
        self.fill_to(4, self.read_timeout).await?;
        let length = u32::from_be_bytes([
            self.read_buf[0],
            self.read_buf[1],
            self.read_buf[2],
            self.read_buf[3],
        ]) as usize;

        if length > MAX_FRAME_LEN {
            return Err(PeerError::InvalidMessage(format!(
                "frame length {}",
                length
            )));
        }

        self.fill_to(4 + length, self.read_timeout).await?;
        let mut frame = self.read_buf.split_to(4 + length);
        let _ = frame.split_to(4);
        Message::decode(frame.freeze())
    }

    async fn fill_to(&mut self, len: usize, deadline: Duration) -> Result<(), PeerError> {
        while self.read_buf.len() < len {
            let n = timeout(deadline, self.stream.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| PeerError::Timeout)??;
            if n == 0 {
                return Err(PeerError::ConnectionClosed);
            }
        }
        Ok(())
    }
}
