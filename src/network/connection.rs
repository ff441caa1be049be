use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use thiserror::Error;

use crate::parser::rdb::parse_rdb_payload;
use crate::parser::resp::{self, ParseError, Token};

const READ_CHUNK: usize = 4096;

pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),
    #[error("protocol violation: {0}")]
    Protocol(#[from] ParseError),
}

/// A socket plus its accumulation buffer. A single TCP read may carry
/// several frames back-to-back or only part of one; buffered bytes are
/// consumed frame-by-frame and topped up from the socket on `Incomplete`.
pub struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    fn fill(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn try_read<T>(
        &mut self,
        parse: impl Fn(&[u8]) -> resp::Result<(T, usize)>,
    ) -> ConnectionResult<Option<T>> {
        loop {
            if !self.buffer.is_empty() {
                match parse(&self.buffer[..]) {
                    Ok((value, len)) => {
                        self.buffer.advance(len);
                        return Ok(Some(value));
                    }
                    Err(ParseError::Incomplete) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            if self.fill()? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None); // clean EOF on a frame boundary
                }
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
        }
    }

    /// Reads the next frame; `None` means the peer closed the connection
    /// between frames.
    pub fn read_token(&mut self) -> ConnectionResult<Option<Token>> {
        self.try_read(|buffer| resp::parse_buffer(buffer).map(|result| (result.token, result.len)))
    }

    /// Reads the CRLF-less snapshot transfer frame sent after FULLRESYNC.
    pub fn read_snapshot_frame(&mut self) -> ConnectionResult<Option<Vec<u8>>> {
        self.try_read(|buffer| parse_rdb_payload(buffer).map(|result| (result.bytes, result.len)))
    }

    pub fn write_token(&mut self, token: &Token) -> io::Result<()> {
        self.write_all(&token.serialize())
    }

    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)
    }

    /// Consumes and discards inbound bytes until the peer closes. Used once
    /// a connection has been promoted to a replica sink: replicas do not
    /// talk back, and anything they send is ignored.
    pub fn discard_inbound(&mut self) -> io::Result<()> {
        self.buffer.clear();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
