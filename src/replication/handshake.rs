use std::io;
use std::net::TcpStream;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::client::{Client, ClientError};
use crate::network::connection::Connection;
use crate::parser::command::{Command, ReplConfDirective};
use crate::parser::resp::Token;
use crate::snapshot::SnapshotError;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("cannot connect to master: {0}")]
    Connect(#[source] io::Error),
    #[error("handshake I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("handshake exchange failed: {0}")]
    Exchange(#[from] ClientError),
    #[error("unexpected master reply: {0}")]
    UnexpectedReply(String),
    #[error("master sent an unusable snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
}

pub struct HandshakeConfig {
    pub master_host: String,
    pub master_port: u16,
    /// The port this replica itself accepts clients on, advertised to the
    /// master via REPLCONF listening-port.
    pub listening_port: u16,
}

pub struct HandshakeOutcome {
    pub client: Client,
    pub snapshot: Vec<u8>,
}

/// Runs the replica side of the synchronization handshake on a fresh
/// connection and hands back that connection together with the master's
/// snapshot. The caller keeps the connection open to consume propagated
/// writes.
pub fn perform_handshake(config: &HandshakeConfig) -> Result<HandshakeOutcome, HandshakeError> {
    info!(
        master_host = %config.master_host,
        master_port = config.master_port,
        "connecting to master"
    );
    let stream = TcpStream::connect((config.master_host.as_str(), config.master_port))
        .map_err(HandshakeError::Connect)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let mut client = Client::from_connection(Connection::new(stream));

    // Step 1: PING, discarding the reply beyond a sanity check
    let reply = client.send(&Command::Ping)?;
    validate_simple(&reply, "PONG")?;

    // Step 2: advertise our listening port and capabilities
    let reply = client.send(&Command::ReplConf(ReplConfDirective::ListeningPort(
        config.listening_port,
    )))?;
    validate_simple(&reply, "OK")?;
    let reply = client.send(&Command::ReplConf(ReplConfDirective::Capa(vec![
        "psync2".to_string(),
    ])))?;
    validate_simple(&reply, "OK")?;

    // Step 3: request a full resynchronization
    let reply = client.send(&Command::Psync {
        replication_id: "?".to_string(),
        offset: -1,
    })?;
    match &reply {
        Token::SimpleString(line) if line.starts_with("FULLRESYNC") => {
            debug!(reply = %line, "master granted full resynchronization");
        }
        other => return Err(HandshakeError::UnexpectedReply(format!("{other:?}"))),
    }

    let snapshot = client.read_snapshot()?;
    info!(bytes = snapshot.len(), "received snapshot from master");

    // The propagation stream is open-ended; only the handshake is allowed
    // to time out.
    client.connection_mut().set_read_timeout(None)?;

    Ok(HandshakeOutcome { client, snapshot })
}

fn validate_simple(reply: &Token, expected: &str) -> Result<(), HandshakeError> {
    match reply.simple_string_data() {
        Ok(data) if data.eq_ignore_ascii_case(expected) => Ok(()),
        _ => Err(HandshakeError::UnexpectedReply(format!("{reply:?}"))),
    }
}
