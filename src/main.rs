use std::thread;

use anyhow::Context;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use respkv::replication::{handshake::HandshakeConfig, replica};
use respkv::server::{config::Config, Server};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();

    let config = Config::from_args();
    let server = Server::bind(config).context("server startup failed")?;

    match server.config().master_address() {
        Some((master_host, master_port)) => {
            // Serve clients while the replication link is brought up; the
            // reference behavior is listener first, handshake immediately.
            let accept_loop = {
                let server = server.clone();
                thread::spawn(move || server.run())
            };
            let handshake = HandshakeConfig {
                master_host,
                master_port,
                listening_port: server.port(),
            };
            replica::run(&handshake, &server).context("replica bringup failed")?;
            // The master is gone and there is no resync; keep serving what
            // we have.
            warn!("replication ended, continuing to serve clients");
            accept_loop
                .join()
                .expect("accept loop panicked")
                .context("listener failed")?;
        }
        None => server.run().context("listener failed")?,
    }
    Ok(())
}
