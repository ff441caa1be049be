use std::path::PathBuf;

use clap::Parser;
use tracing::warn;

const DEFAULT_DIR: &str = "/tmp/redis-files";
const DEFAULT_DBFILENAME: &str = "dump.rdb";

#[derive(Parser, Debug, Clone)]
#[command(version, about = "RESP-compatible in-memory key-value server", long_about = None)]
pub struct Config {
    /// Port to listen on.
    #[arg(long, default_value_t = 6379)]
    port: u16,
    /// Replicate from a master, given as "<host> <port>" or "<host>:<port>".
    #[arg(long)]
    replicaof: Option<String>,
    /// Directory holding the startup snapshot.
    #[arg(long, default_value = DEFAULT_DIR)]
    dir: String,
    /// Snapshot filename inside `dir`.
    #[arg(long, default_value = DEFAULT_DBFILENAME)]
    dbfilename: String,
}

impl Config {
    pub fn from_args() -> Self {
        Config::parse()
    }

    /// Non-CLI constructor; tests pass port 0 to get an ephemeral port.
    pub fn listening_on(port: u16) -> Self {
        Config {
            port,
            replicaof: None,
            dir: DEFAULT_DIR.to_string(),
            dbfilename: DEFAULT_DBFILENAME.to_string(),
        }
    }

    pub fn replica_of(mut self, master: impl Into<String>) -> Self {
        self.replicaof = Some(master.into());
        self
    }

    pub fn with_snapshot(mut self, dir: impl Into<String>, dbfilename: impl Into<String>) -> Self {
        self.dir = dir.into();
        self.dbfilename = dbfilename.into();
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn dbfilename(&self) -> &str {
        &self.dbfilename
    }

    pub fn snapshot_path(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(&self.dbfilename)
    }

    pub fn is_master(&self) -> bool {
        self.replicaof.is_none()
    }

    pub fn master_address(&self) -> Option<(String, u16)> {
        let address = self.replicaof.as_deref()?;
        let parts = address.split_whitespace().collect::<Vec<_>>();
        let (host, port) = match parts.as_slice() {
            [host, port] => (*host, *port),
            [single] => match single.split_once(':') {
                Some((host, port)) => (host, port),
                None => {
                    warn!(%address, "invalid replicaof address, expected <host> <port> or <host>:<port>");
                    return None;
                }
            },
            _ => {
                warn!(%address, "invalid replicaof address, expected <host> <port> or <host>:<port>");
                return None;
            }
        };
        match port.parse() {
            Ok(port) => Some((host.to_string(), port)),
            Err(_) => {
                warn!(%address, "invalid replicaof port");
                None
            }
        }
    }
}
