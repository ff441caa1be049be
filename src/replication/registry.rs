use std::collections::HashMap;
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread;

use tracing::{debug, warn};

// Writes a replica cannot absorb pile up here before we give up on it.
const PROPAGATION_QUEUE_DEPTH: usize = 64;

struct ReplicaSink {
    #[allow(dead_code)]
    listening_port: Option<u16>,
    sender: SyncSender<Vec<u8>>,
}

/// Master-side registry of promoted replica connections. Each sink owns a
/// bounded queue drained by a dedicated writer thread, so propagation never
/// blocks the dispatcher on a slow replica socket and every replica sees
/// writes in dispatch order.
#[derive(Default)]
pub struct ReplicaRegistry {
    replicas: HashMap<SocketAddr, ReplicaSink>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self {
            replicas: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        stream: TcpStream,
        listening_port: Option<u16>,
    ) -> std::io::Result<()> {
        let addr = stream.peer_addr()?;
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(PROPAGATION_QUEUE_DEPTH);
        thread::spawn(move || {
            let mut stream = stream;
            for message in receiver {
                if let Err(error) = stream.write_all(&message) {
                    debug!(replica = %addr, %error, "replica sink write failed");
                    break;
                }
            }
            let _ = stream.shutdown(Shutdown::Both);
        });
        self.replicas.insert(addr, ReplicaSink {
            listening_port,
            sender,
        });
        Ok(())
    }

    pub fn deregister(&mut self, addr: &SocketAddr) -> bool {
        self.replicas.remove(addr).is_some()
    }

    /// Queues `message` for every registered replica. A sink that is gone
    /// or hopelessly backed up is dropped; propagation is best-effort and
    /// never surfaces to the client.
    pub fn propagate(&mut self, message: &[u8]) {
        let mut dropped = Vec::new();
        for (addr, sink) in &self.replicas {
            match sink.sender.try_send(message.to_vec()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => dropped.push((*addr, "propagation queue overflow")),
                Err(TrySendError::Disconnected(_)) => dropped.push((*addr, "sink disconnected")),
            }
        }
        for (addr, reason) in dropped {
            self.replicas.remove(&addr);
            warn!(replica = %addr, reason, "removing replica sink");
        }
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }
}
