mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{wait_until, TestServer};
use respkv::client::Client;
use respkv::parser::command::Command;
use respkv::parser::resp::Token;
use respkv::server::config::Config;
use respkv::server::metadata::REPLICATION_ID;
use respkv::server::Server;

fn simple(data: &str) -> Token {
    Token::SimpleString(data.to_string())
}

fn bulk(data: &[u8]) -> Token {
    Token::BulkString(data.to_vec())
}

#[test]
fn binds_to_a_port_and_accepts_connections() {
    let server = TestServer::start(Config::listening_on(0));
    assert!(Client::connect(server.addr()).is_ok());
}

#[test]
fn responds_to_ping() {
    let server = TestServer::start(Config::listening_on(0));
    let mut client = Client::connect(server.addr()).unwrap();
    assert_eq!(client.send(&Command::Ping).unwrap(), simple("PONG"));
}

#[test]
fn responds_to_multiple_pings_on_one_connection() {
    let server = TestServer::start(Config::listening_on(0));
    let mut client = Client::connect(server.addr()).unwrap();
    for _ in 0..5 {
        assert_eq!(client.send(&Command::Ping).unwrap(), simple("PONG"));
    }
}

#[test]
fn responds_to_concurrent_pings_without_crosstalk() {
    let server = TestServer::start(Config::listening_on(0));
    let addr = server.addr();

    let clients: Vec<_> = (0..10)
        .map(|_| {
            let addr = addr.clone();
            std::thread::spawn(move || {
                let mut client = Client::connect(addr).unwrap();
                client.send(&Command::Ping).unwrap()
            })
        })
        .collect();

    for client in clients {
        assert_eq!(client.join().unwrap(), simple("PONG"));
    }
}

#[test]
fn responds_to_echo() {
    let server = TestServer::start(Config::listening_on(0));
    let mut client = Client::connect(server.addr()).unwrap();
    assert_eq!(
        client.send(&Command::Echo(b"hello".to_vec())).unwrap(),
        simple("hello")
    );
}

#[test]
fn set_then_get_returns_the_value() {
    let server = TestServer::start(Config::listening_on(0));
    let mut client = Client::connect(server.addr()).unwrap();
    assert_eq!(
        client.send_args(&[b"SET", b"foo", b"bar"]).unwrap(),
        simple("OK")
    );
    assert_eq!(client.send_args(&[b"GET", b"foo"]).unwrap(), bulk(b"bar"));
}

#[test]
fn get_of_a_missing_key_is_nil() {
    let server = TestServer::start(Config::listening_on(0));
    let mut client = Client::connect(server.addr()).unwrap();
    assert_eq!(
        client.send_args(&[b"GET", b"foo"]).unwrap(),
        Token::NullBulkString
    );
}

#[test]
fn get_of_an_expired_key_is_nil() {
    let server = TestServer::start(Config::listening_on(0));
    // 2021-01-01T00:00:00Z
    let expired = UNIX_EPOCH + Duration::from_secs(1_609_459_200);
    server.server.keyspace.set_at(b"foo", b"bar", Some(expired));

    let mut client = Client::connect(server.addr()).unwrap();
    assert_eq!(
        client.send_args(&[b"GET", b"foo"]).unwrap(),
        Token::NullBulkString
    );
}

#[test]
fn get_of_an_unexpired_key_returns_the_value() {
    let server = TestServer::start(Config::listening_on(0));
    let expires_at = SystemTime::now() + Duration::from_secs(3600);
    server.server.keyspace.set_at(b"foo", b"bar", Some(expires_at));

    let mut client = Client::connect(server.addr()).unwrap();
    assert_eq!(client.send_args(&[b"GET", b"foo"]).unwrap(), bulk(b"bar"));
}

#[test]
fn set_with_px_expires_the_key() {
    let server = TestServer::start(Config::listening_on(0));
    let mut client = Client::connect(server.addr()).unwrap();
    assert_eq!(
        client
            .send_args(&[b"SET", b"foo", b"bar", b"px", b"80"])
            .unwrap(),
        simple("OK")
    );
    assert!(wait_until(Duration::from_secs(2), || {
        let mut client = Client::connect(server.addr()).unwrap();
        client.send_args(&[b"GET", b"foo"]).unwrap() == Token::NullBulkString
    }));
}

#[test]
fn unknown_command_leaves_the_connection_usable() {
    let server = TestServer::start(Config::listening_on(0));
    let mut client = Client::connect(server.addr()).unwrap();
    match client.send_args(&[b"FLUSHALL"]).unwrap() {
        Token::Error(message) => assert!(message.contains("unknown command")),
        other => panic!("expected an error reply, got {other:?}"),
    }
    assert_eq!(client.send(&Command::Ping).unwrap(), simple("PONG"));
}

#[test]
fn wrong_arity_is_reported() {
    let server = TestServer::start(Config::listening_on(0));
    let mut client = Client::connect(server.addr()).unwrap();
    match client.send_args(&[b"GET"]).unwrap() {
        Token::Error(message) => assert!(message.contains("wrong number of arguments")),
        other => panic!("expected an error reply, got {other:?}"),
    }
}

#[test]
fn non_numeric_px_is_reported() {
    let server = TestServer::start(Config::listening_on(0));
    let mut client = Client::connect(server.addr()).unwrap();
    match client
        .send_args(&[b"SET", b"foo", b"bar", b"px", b"soon"])
        .unwrap()
    {
        Token::Error(message) => {
            assert!(message.contains("value is not an integer"))
        }
        other => panic!("expected an error reply, got {other:?}"),
    }
    assert_eq!(client.send(&Command::Ping).unwrap(), simple("PONG"));
}

#[test]
fn malformed_frame_closes_the_connection() {
    let server = TestServer::start(Config::listening_on(0));
    let mut stream = TcpStream::connect(server.addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream.write_all(b"bogus\r\n").unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).unwrap(); // server closes after the error
    assert!(String::from_utf8_lossy(&reply).starts_with("-ERR"));
}

#[test]
fn pipelined_requests_are_answered_in_order() {
    let server = TestServer::start(Config::listening_on(0));
    let mut stream = TcpStream::connect(server.addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
        .write_all(b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n")
        .unwrap();

    let mut reply = [0u8; 12];
    stream.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"+PONG\r\n+hi\r\n");
}

#[test]
fn info_reports_the_master_role() {
    let server = TestServer::start(Config::listening_on(0));
    let mut client = Client::connect(server.addr()).unwrap();
    let reply = client.send(&Command::Info("replication".to_string())).unwrap();
    let expected =
        format!("role:master\nmaster_replid:{REPLICATION_ID}\nmaster_repl_offset:0");
    assert_eq!(reply, bulk(expected.as_bytes()));
}

#[test]
fn info_reports_the_slave_role() {
    let config = Config::listening_on(0).replica_of("127.0.0.1:9");
    let server = TestServer::start(config);
    let mut client = Client::connect(server.addr()).unwrap();
    let reply = client.send(&Command::Info("replication".to_string())).unwrap();
    assert_eq!(reply, bulk(b"role:slave"));
}

#[test]
fn config_get_returns_dir_and_dbfilename() {
    let config = Config::listening_on(0).with_snapshot("/tmp/redis-files", "dump.rdb");
    let server = TestServer::start(config);
    let mut client = Client::connect(server.addr()).unwrap();

    assert_eq!(
        client.send_args(&[b"CONFIG", b"GET", b"dir"]).unwrap(),
        Token::Array(vec![bulk(b"dir"), bulk(b"/tmp/redis-files")])
    );
    assert_eq!(
        client.send_args(&[b"CONFIG", b"GET", b"dbfilename"]).unwrap(),
        Token::Array(vec![bulk(b"dbfilename"), bulk(b"dump.rdb")])
    );
}

#[test]
fn config_get_of_an_unknown_parameter_is_an_error() {
    let server = TestServer::start(Config::listening_on(0));
    let mut client = Client::connect(server.addr()).unwrap();
    assert!(matches!(
        client.send_args(&[b"CONFIG", b"GET", b"maxmemory"]).unwrap(),
        Token::Error(_)
    ));
}

#[test]
fn keys_lists_live_entries_only() {
    let server = TestServer::start(Config::listening_on(0));
    let expired = UNIX_EPOCH + Duration::from_secs(1_609_459_200);
    server.server.keyspace.set_at(b"dead", b"x", Some(expired));

    let mut client = Client::connect(server.addr()).unwrap();
    client.send_args(&[b"SET", b"foo", b"1"]).unwrap();
    client.send_args(&[b"SET", b"bar", b"2"]).unwrap();

    let reply = client.send_args(&[b"KEYS", b"*"]).unwrap();
    let Token::Array(items) = reply else {
        panic!("expected an array reply");
    };
    let mut keys: Vec<Vec<u8>> = items
        .into_iter()
        .map(|item| item.bulk_string_data().unwrap().to_vec())
        .collect();
    keys.sort();
    assert_eq!(keys, vec![b"bar".to_vec(), b"foo".to_vec()]);
}

// Minimal dump builder for snapshot-loading tests; layout matches what the
// snapshot decoder consumes.
fn dump_with_entries(entries: &[(&[u8], &[u8], Option<u64>)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"REDIS0011");
    out.extend_from_slice(&[0xFE, 0x00]);
    for (key, value, expiry_ms) in entries {
        if let Some(millis) = expiry_ms {
            out.push(0xFC);
            out.extend_from_slice(&millis.to_le_bytes());
        }
        out.push(0x00);
        out.push(key.len() as u8);
        out.extend_from_slice(key);
        out.push(value.len() as u8);
        out.extend_from_slice(value);
    }
    out.push(0xFF);
    out.extend_from_slice(&[0u8; 8]);
    out
}

#[test]
fn loads_the_snapshot_before_serving() {
    let dir = tempfile::tempdir().unwrap();
    let expired_ms = 1_609_459_200_000; // 2021-01-01T00:00:00Z
    let dump = dump_with_entries(&[
        (b"fruit", b"apple", None),
        (b"stale", b"old", Some(expired_ms)),
    ]);
    std::fs::write(dir.path().join("dump.rdb"), dump).unwrap();

    let config = Config::listening_on(0)
        .with_snapshot(dir.path().to_str().unwrap(), "dump.rdb");
    let server = TestServer::start(config);
    let mut client = Client::connect(server.addr()).unwrap();

    assert_eq!(
        client.send_args(&[b"GET", b"fruit"]).unwrap(),
        bulk(b"apple")
    );
    assert_eq!(
        client.send_args(&[b"GET", b"stale"]).unwrap(),
        Token::NullBulkString
    );
}

#[test]
fn missing_snapshot_starts_an_empty_keyspace() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::listening_on(0)
        .with_snapshot(dir.path().to_str().unwrap(), "absent.rdb");
    let server = TestServer::start(config);
    let mut client = Client::connect(server.addr()).unwrap();
    assert_eq!(
        client.send_args(&[b"KEYS", b"*"]).unwrap(),
        Token::Array(vec![])
    );
}

#[test]
fn corrupt_snapshot_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("dump.rdb"), b"NOTRDB001").unwrap();
    let config = Config::listening_on(0)
        .with_snapshot(dir.path().to_str().unwrap(), "dump.rdb");
    assert!(Server::bind(config).is_err());
}
