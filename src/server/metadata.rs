use super::config::Config;

// Advertised on the wire by INFO and FULLRESYNC; fixed for the lifetime of
// the process, as is the offset of 0.
pub const REPLICATION_ID: &str = "8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb";

#[derive(Debug)]
pub struct MasterInfo {
    pub replication_id: String,
}

#[derive(Debug)]
pub struct ReplicaOf {
    pub master_host: String,
    pub master_port: u16,
}

#[derive(Debug)]
pub enum Role {
    Master(MasterInfo),
    Replica(ReplicaOf),
}

#[derive(Debug)]
pub struct ServerMetadata {
    pub listening_port: u16,
    pub role: Role,
}

impl ServerMetadata {
    /// `listening_port` is the port actually bound, which may differ from
    /// the configured one when port 0 was requested.
    pub fn generate(config: &Config, listening_port: u16) -> Self {
        let role = match config.master_address() {
            Some((master_host, master_port)) => Role::Replica(ReplicaOf {
                master_host,
                master_port,
            }),
            None => Role::Master(MasterInfo {
                replication_id: REPLICATION_ID.to_string(),
            }),
        };
        ServerMetadata {
            listening_port,
            role,
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self.role, Role::Master(_))
    }

    pub fn role_name(&self) -> &'static str {
        match self.role {
            Role::Master(_) => "master",
            Role::Replica(_) => "slave",
        }
    }

    /// The INFO replication payload. The field layout is observable on the
    /// wire and asserted by clients, so it changes for no one.
    pub fn replication_info(&self) -> Vec<u8> {
        match &self.role {
            Role::Master(info) => format!(
                "role:master\nmaster_replid:{}\nmaster_repl_offset:0",
                info.replication_id
            )
            .into_bytes(),
            Role::Replica(_) => b"role:slave".to_vec(),
        }
    }
}
