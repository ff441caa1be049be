use std::io;
use std::net::{TcpStream, ToSocketAddrs};

use thiserror::Error;

use crate::network::connection::{Connection, ConnectionError};
use crate::parser::command::Command;
use crate::parser::resp::Token;

/// Minimal blocking RESP client. The replica handshake drives its master
/// connection through this, and the integration tests use it as a stand-in
/// for a real client.
pub struct Client {
    conn: Connection,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("server closed the connection")]
    Closed,
}

impl Client {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        Ok(Self::from_connection(Connection::new(stream)))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn send(&mut self, command: &Command) -> Result<Token, ClientError> {
        self.conn.write_token(&command.to_token())?;
        self.read_reply()
    }

    /// Sends a raw argument array without going through `Command`, so tests
    /// can exercise inputs the typed surface would reject.
    pub fn send_args(&mut self, args: &[&[u8]]) -> Result<Token, ClientError> {
        self.conn.write_token(&Token::command(args))?;
        self.read_reply()
    }

    pub fn read_reply(&mut self) -> Result<Token, ClientError> {
        self.conn.read_token()?.ok_or(ClientError::Closed)
    }

    pub fn read_snapshot(&mut self) -> Result<Vec<u8>, ClientError> {
        self.conn.read_snapshot_frame()?.ok_or(ClientError::Closed)
    }
}
