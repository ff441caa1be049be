#![allow(dead_code)]

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use respkv::server::{config::Config, Server, ServerError};

/// A server running on its own accept thread, stopped when dropped.
pub struct TestServer {
    pub server: Arc<Server>,
    handle: Option<JoinHandle<Result<(), ServerError>>>,
}

impl TestServer {
    pub fn start(config: Config) -> Self {
        let server = Server::bind(config).expect("failed to bind test server");
        let handle = {
            let server = Arc::clone(&server);
            std::thread::spawn(move || server.run())
        };
        TestServer {
            server,
            handle: Some(handle),
        }
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Polls `predicate` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    predicate()
}
