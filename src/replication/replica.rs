use tracing::{debug, info, warn};

use crate::parser::command::Command;
use crate::server::Server;
use crate::snapshot::{self, SnapshotReader};

use super::handshake::{perform_handshake, HandshakeConfig, HandshakeError, HandshakeOutcome};

/// Brings this server up as a replica: handshakes with the master, applies
/// the transferred snapshot, then consumes propagated writes until the
/// master goes away. Handshake failures are fatal and bubble up; a dropped
/// stream afterwards ends replication quietly (there is no reconnect).
pub fn run(config: &HandshakeConfig, server: &Server) -> Result<(), HandshakeError> {
    let HandshakeOutcome {
        mut client,
        snapshot,
    } = perform_handshake(config)?;

    let reader = SnapshotReader::new(snapshot.as_slice())?;
    let installed = snapshot::load_records(reader, &server.keyspace)?;
    info!(keys = installed, "applied master snapshot");

    loop {
        let token = match client.connection_mut().read_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                info!("master closed the replication stream");
                return Ok(());
            }
            Err(error) => {
                warn!(%error, "replication stream failed");
                return Ok(());
            }
        };
        match Command::from_token(&token) {
            Ok(Command::Set { key, value, expiry }) => {
                debug!(key = %String::from_utf8_lossy(&key), "applying propagated write");
                server.keyspace.set(&key, &value, expiry);
            }
            // Replicas never answer on this connection, so anything that is
            // not a write is dropped on the floor.
            Ok(other) => debug!(command = ?other, "ignoring propagated command"),
            Err(error) => warn!(%error, "discarding unparseable propagated command"),
        }
    }
}
