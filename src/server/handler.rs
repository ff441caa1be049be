use std::io;
use std::sync::Arc;

use tracing::info;

use crate::network::connection::Connection;
use crate::parser::command::{Command, ReplConfDirective};
use crate::parser::resp::Token;
use crate::replication::rdb::{empty_snapshot, encode_snapshot_frame};
use crate::server::metadata::Role;
use crate::server::Server;

/// What the connection loop should do after a command was dispatched.
pub enum Disposition {
    Continue,
    /// The connection answered PSYNC and is now a replica sink; stop
    /// serving requests on it.
    Promoted,
}

pub fn write_error(conn: &mut Connection, message: &str) -> io::Result<()> {
    conn.write_token(&Token::Error(format!("ERR {message}")))
}

pub struct CommandHandler {
    server: Arc<Server>,
    // Remembered from REPLCONF listening-port until PSYNC promotes the
    // connection.
    pending_replica_port: Option<u16>,
}

impl CommandHandler {
    pub fn new(server: Arc<Server>) -> Self {
        CommandHandler {
            server,
            pending_replica_port: None,
        }
    }

    pub fn handle(&mut self, conn: &mut Connection, command: Command) -> io::Result<Disposition> {
        match command {
            Command::Ping => self.write_simple(conn, "PONG")?,
            Command::Echo(data) => {
                let echoed = String::from_utf8_lossy(&data).into_owned();
                conn.write_token(&Token::SimpleString(echoed))?;
            }
            Command::Get(key) => {
                let reply = match self.server.keyspace.get(&key) {
                    Some(value) => Token::BulkString(value),
                    None => Token::NullBulkString,
                };
                conn.write_token(&reply)?;
            }
            Command::Set { .. } => return self.handle_set(conn, command),
            Command::ConfigGet(name) => self.handle_config_get(conn, &name)?,
            Command::Keys(pattern) => {
                if pattern == "*" {
                    let keys = self.server.keyspace.keys();
                    let items = keys.into_iter().map(Token::BulkString).collect();
                    conn.write_token(&Token::Array(items))?;
                } else {
                    write_error(conn, "only the '*' pattern is supported")?;
                }
            }
            Command::Info(section) => {
                if section.eq_ignore_ascii_case("replication") {
                    conn.write_token(&Token::BulkString(
                        self.server.metadata.replication_info(),
                    ))?;
                } else {
                    write_error(conn, &format!("unsupported INFO section '{section}'"))?;
                }
            }
            Command::ReplConf(ReplConfDirective::ListeningPort(port)) => {
                self.pending_replica_port = Some(port);
                self.write_simple(conn, "OK")?;
            }
            Command::ReplConf(ReplConfDirective::Capa(_)) => self.write_simple(conn, "OK")?,
            Command::Psync { .. } => return self.handle_psync(conn),
        }
        Ok(Disposition::Continue)
    }

    fn handle_set(&mut self, conn: &mut Connection, command: Command) -> io::Result<Disposition> {
        let Command::Set {
            ref key,
            ref value,
            expiry,
        } = command
        else {
            unreachable!("handle_set called for a non-SET command");
        };
        self.server.keyspace.set(key, value, expiry);

        // Fire-and-forget fanout; the client gets its OK regardless of what
        // the replicas are up to. Replicas themselves have no sinks and
        // never re-propagate.
        if self.server.metadata.is_master() {
            let payload = command.to_token().serialize();
            self.server.replicas.lock().unwrap().propagate(&payload);
        }
        self.write_simple(conn, "OK")?;
        Ok(Disposition::Continue)
    }

    fn handle_config_get(&self, conn: &mut Connection, name: &str) -> io::Result<()> {
        let value = match name {
            "dir" => self.server.config().dir(),
            "dbfilename" => self.server.config().dbfilename(),
            _ => return write_error(conn, &format!("unsupported CONFIG parameter '{name}'")),
        };
        conn.write_token(&Token::Array(vec![
            Token::bulk(name.as_bytes()),
            Token::bulk(value.as_bytes()),
        ]))
    }

    fn handle_psync(&mut self, conn: &mut Connection) -> io::Result<Disposition> {
        let Role::Master(info) = &self.server.metadata.role else {
            write_error(conn, "PSYNC can only be served by a master")?;
            return Ok(Disposition::Continue);
        };

        // 1. Grant the full resynchronization
        self.write_simple(conn, &format!("FULLRESYNC {} 0", info.replication_id))?;

        // 2. Transfer the snapshot
        conn.write_all(&encode_snapshot_frame(&empty_snapshot()))?;

        // 3. Register this very connection as the propagation sink
        let sink = conn.stream().try_clone()?;
        let mut replicas = self.server.replicas.lock().unwrap();
        replicas.register(sink, self.pending_replica_port)?;
        info!(
            replica = ?conn.peer_addr().ok(),
            connected = replicas.len(),
            "promoted connection to replica sink"
        );
        Ok(Disposition::Promoted)
    }

    fn write_simple(&self, conn: &mut Connection, data: &str) -> io::Result<()> {
        conn.write_token(&Token::SimpleString(data.to_string()))
    }
}
