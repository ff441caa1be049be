pub mod config;
pub mod handler;
pub mod metadata;

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::network::connection::{Connection, ConnectionError};
use crate::parser::command::Command;
use crate::replication::registry::ReplicaRegistry;
use crate::snapshot::{self, SnapshotError, SnapshotReader};
use crate::storage::keyspace::Keyspace;

use self::config::Config;
use self::handler::{write_error, CommandHandler, Disposition};
use self::metadata::ServerMetadata;

const BIND_HOST: &str = "0.0.0.0";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("failed to load snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// The server instance: listener, keyspace, replica registry and config,
/// shared by every connection thread through an `Arc`.
pub struct Server {
    pub metadata: ServerMetadata,
    pub keyspace: Keyspace,
    pub replicas: Mutex<ReplicaRegistry>,
    config: Config,
    listener: TcpListener,
    shutdown: AtomicBool,
    connections: Mutex<HashMap<SocketAddr, TcpStream>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Binds the listening socket and loads the startup snapshot. Nothing
    /// is accepted until `run`, but the keyspace is fully populated here so
    /// the first client already sees it.
    pub fn bind(config: Config) -> Result<Arc<Server>, ServerError> {
        let addr = format!("{BIND_HOST}:{}", config.port());
        let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        let listening_port = listener.local_addr()?.port();

        let keyspace = Keyspace::new();
        let snapshot_path = config.snapshot_path();
        match SnapshotReader::open(&snapshot_path) {
            Ok(reader) => {
                let installed = snapshot::load_records(reader, &keyspace)?;
                info!(path = %snapshot_path.display(), keys = installed, "loaded snapshot");
            }
            Err(SnapshotError::Io(ref e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %snapshot_path.display(), "no snapshot file, starting empty");
            }
            Err(error) => return Err(error.into()),
        }

        let metadata = ServerMetadata::generate(&config, listening_port);
        Ok(Arc::new(Server {
            metadata,
            keyspace,
            replicas: Mutex::new(ReplicaRegistry::new()),
            config,
            listener,
            shutdown: AtomicBool::new(false),
            connections: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The port actually bound; differs from the configured one when port 0
    /// was requested.
    pub fn port(&self) -> u16 {
        self.metadata.listening_port
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.lock().unwrap().len()
    }

    /// Accepts connections until `stop` is called, spawning one worker
    /// thread per connection so the listener itself never blocks on a
    /// handler.
    pub fn run(self: Arc<Self>) -> Result<(), ServerError> {
        info!(
            port = self.port(),
            role = self.metadata.role_name(),
            "accepting connections"
        );
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    self.track_connection(addr, &stream);
                    let server = Arc::clone(&self);
                    let worker =
                        thread::spawn(move || handle_connection(server, stream, addr));
                    let mut workers = self.workers.lock().unwrap();
                    workers.retain(|worker| !worker.is_finished());
                    workers.push(worker);
                }
                Err(error) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    warn!(%error, "failed to accept a connection");
                }
            }
        }
        info!("listener stopped");
        Ok(())
    }

    /// Signals shutdown, wakes the accept loop, closes every live client
    /// socket and waits for the workers to drain.
    pub fn stop(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // unblock the accept loop
        let _ = TcpStream::connect(("127.0.0.1", self.port()));
        // handlers observe the closed socket as a clean terminator
        for (_, stream) in self.connections.lock().unwrap().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.join();
        }
    }

    fn track_connection(&self, addr: SocketAddr, stream: &TcpStream) {
        match stream.try_clone() {
            Ok(clone) => {
                self.connections.lock().unwrap().insert(addr, clone);
            }
            Err(error) => warn!(%addr, %error, "cannot track connection for shutdown"),
        }
    }

    fn forget_connection(&self, addr: &SocketAddr) {
        self.connections.lock().unwrap().remove(addr);
    }
}

fn handle_connection(server: Arc<Server>, stream: TcpStream, addr: SocketAddr) {
    debug!(%addr, "client connected");
    let mut conn = Connection::new(stream);
    let mut handler = CommandHandler::new(Arc::clone(&server));
    let mut promoted = false;

    loop {
        let token = match conn.read_token() {
            Ok(Some(token)) => token,
            Ok(None) => break,
            Err(ConnectionError::Protocol(error)) => {
                // Framing is broken, the stream cannot be trusted any more.
                warn!(%addr, %error, "malformed frame, closing connection");
                let _ = write_error(&mut conn, "protocol error");
                break;
            }
            Err(ConnectionError::Io(error)) => {
                debug!(%addr, %error, "connection read failed");
                break;
            }
        };
        let command = match Command::from_token(&token) {
            Ok(command) => command,
            Err(error) => {
                debug!(%addr, %error, "rejected command");
                if write_error(&mut conn, &error.to_string()).is_err() {
                    break;
                }
                continue;
            }
        };
        match handler.handle(&mut conn, command) {
            Ok(Disposition::Continue) => {}
            Ok(Disposition::Promoted) => {
                promoted = true;
                break;
            }
            Err(error) => {
                debug!(%addr, %error, "connection write failed");
                break;
            }
        }
    }

    if promoted {
        // Replica sinks only ever receive; hold the socket open for the
        // writer thread and swallow anything the replica sends.
        if let Err(error) = conn.discard_inbound() {
            debug!(%addr, %error, "replica sink closed with error");
        }
        if server.replicas.lock().unwrap().deregister(&addr) {
            info!(%addr, "replica disconnected");
        }
    }

    server.forget_connection(&addr);
    debug!(%addr, "client disconnected");
}
