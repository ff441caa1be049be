use std::time::Duration;

use thiserror::Error;

use super::resp::Token;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ReplConfDirective {
    ListeningPort(u16),
    Capa(Vec<String>),
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Command {
    Ping,
    Echo(Vec<u8>),
    Get(Vec<u8>),
    Set {
        key: Vec<u8>,
        value: Vec<u8>,
        expiry: Option<Duration>,
    },
    ConfigGet(String),
    Keys(String),
    Info(String),
    ReplConf(ReplConfDirective),
    Psync {
        replication_id: String,
        offset: i64,
    },
}

/// Errors scoped to a single request. Unlike a framing error these leave the
/// connection usable; the handler reports them as RESP errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("{0}")]
    BadArgument(String),
}

fn utf8_argument(data: &[u8]) -> Result<&str, CommandError> {
    std::str::from_utf8(data)
        .map_err(|_| CommandError::BadArgument("argument is not valid UTF-8".to_string()))
}

fn parse_set(args: &[&[u8]]) -> Result<Command, CommandError> {
    let (key, value) = match args {
        [key, value] | [key, value, _, _] => (key.to_vec(), value.to_vec()),
        _ => return Err(CommandError::WrongArity("set".to_string())),
    };
    let expiry = match args {
        [_, _] => None,
        [_, _, option, millis] => {
            if !option.eq_ignore_ascii_case(b"px") {
                return Err(CommandError::BadArgument("syntax error".to_string()));
            }
            let millis: u64 = utf8_argument(millis)?.parse().map_err(|_| {
                CommandError::BadArgument("value is not an integer or out of range".to_string())
            })?;
            Some(Duration::from_millis(millis))
        }
        _ => unreachable!("arity checked above"),
    };
    Ok(Command::Set { key, value, expiry })
}

fn parse_replconf(args: &[&[u8]]) -> Result<Command, CommandError> {
    let (option, rest) = args
        .split_first()
        .ok_or_else(|| CommandError::WrongArity("replconf".to_string()))?;
    let option = utf8_argument(option)?.to_lowercase();
    let directive = match option.as_str() {
        "listening-port" => match rest {
            [port] => {
                let port = utf8_argument(port)?.parse().map_err(|_| {
                    CommandError::BadArgument("invalid listening-port".to_string())
                })?;
                ReplConfDirective::ListeningPort(port)
            }
            _ => return Err(CommandError::WrongArity("replconf".to_string())),
        },
        "capa" => {
            let mut capabilities = Vec::with_capacity(rest.len());
            for capa in rest {
                capabilities.push(utf8_argument(capa)?.to_string());
            }
            ReplConfDirective::Capa(capabilities)
        }
        other => {
            return Err(CommandError::BadArgument(format!(
                "unrecognized REPLCONF option '{other}'"
            )))
        }
    };
    Ok(Command::ReplConf(directive))
}

impl Command {
    /// Compiles the command form (an array of bulk strings) into a request.
    pub fn from_token(token: &Token) -> Result<Command, CommandError> {
        let items = match token {
            Token::Array(items) => items,
            _ => {
                return Err(CommandError::BadArgument(
                    "expected an array of bulk strings".to_string(),
                ))
            }
        };
        let mut args = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Token::BulkString(data) => args.push(data.as_slice()),
                _ => {
                    return Err(CommandError::BadArgument(
                        "expected an array of bulk strings".to_string(),
                    ))
                }
            }
        }
        let (name, rest) = args
            .split_first()
            .ok_or_else(|| CommandError::BadArgument("empty command".to_string()))?;
        let name = utf8_argument(name)?;

        match name.to_lowercase().as_str() {
            "ping" => match rest {
                [] => Ok(Command::Ping),
                _ => Err(CommandError::WrongArity("ping".to_string())),
            },
            "echo" => match rest {
                [message] => Ok(Command::Echo(message.to_vec())),
                _ => Err(CommandError::WrongArity("echo".to_string())),
            },
            "get" => match rest {
                [key] => Ok(Command::Get(key.to_vec())),
                _ => Err(CommandError::WrongArity("get".to_string())),
            },
            "set" => parse_set(rest),
            "config" => {
                let (subcommand, rest) = rest
                    .split_first()
                    .ok_or_else(|| CommandError::WrongArity("config".to_string()))?;
                if !subcommand.eq_ignore_ascii_case(b"get") {
                    return Err(CommandError::BadArgument(format!(
                        "unknown CONFIG subcommand '{}'",
                        utf8_argument(subcommand)?
                    )));
                }
                match rest {
                    [name] => Ok(Command::ConfigGet(utf8_argument(name)?.to_string())),
                    _ => Err(CommandError::WrongArity("config".to_string())),
                }
            }
            "keys" => match rest {
                [pattern] => Ok(Command::Keys(utf8_argument(pattern)?.to_string())),
                _ => Err(CommandError::WrongArity("keys".to_string())),
            },
            "info" => match rest {
                [section] => Ok(Command::Info(utf8_argument(section)?.to_string())),
                _ => Err(CommandError::WrongArity("info".to_string())),
            },
            "replconf" => parse_replconf(rest),
            "psync" => match rest {
                [replication_id, offset] => Ok(Command::Psync {
                    replication_id: utf8_argument(replication_id)?.to_string(),
                    offset: utf8_argument(offset)?.parse().map_err(|_| {
                        CommandError::BadArgument("invalid PSYNC offset".to_string())
                    })?,
                }),
                _ => Err(CommandError::WrongArity("psync".to_string())),
            },
            _ => Err(CommandError::UnknownCommand(name.to_string())),
        }
    }

    /// Re-serializes the request in its canonical wire form. The dispatcher
    /// uses this to forward mutating commands to replica sinks.
    pub fn to_token(&self) -> Token {
        match self {
            Command::Ping => Token::command(&[b"PING"]),
            Command::Echo(message) => Token::command(&[b"ECHO", message]),
            Command::Get(key) => Token::command(&[b"GET", key]),
            Command::Set { key, value, expiry } => match expiry {
                Some(expiry) => {
                    let millis = expiry.as_millis().to_string();
                    Token::command(&[b"SET", key, value, b"PX", millis.as_bytes()])
                }
                None => Token::command(&[b"SET", key, value]),
            },
            Command::ConfigGet(name) => Token::command(&[b"CONFIG", b"GET", name.as_bytes()]),
            Command::Keys(pattern) => Token::command(&[b"KEYS", pattern.as_bytes()]),
            Command::Info(section) => Token::command(&[b"INFO", section.as_bytes()]),
            Command::ReplConf(ReplConfDirective::ListeningPort(port)) => {
                let port = port.to_string();
                Token::command(&[b"REPLCONF", b"listening-port", port.as_bytes()])
            }
            Command::ReplConf(ReplConfDirective::Capa(capabilities)) => {
                let mut args: Vec<&[u8]> = vec![b"REPLCONF", b"capa"];
                args.extend(capabilities.iter().map(|capa| capa.as_bytes()));
                Token::command(&args)
            }
            Command::Psync {
                replication_id,
                offset,
            } => {
                let offset = offset.to_string();
                Token::command(&[b"PSYNC", replication_id.as_bytes(), offset.as_bytes()])
            }
        }
    }
}
