//! kvregistry - A Line-Protocol Key-Value Registry
//!
//! This is the main entry point for the kvregistry server.
//! It loads the registry file, binds the TCP listener and runs the event loop.

use anyhow::Context;
use kvregistry::config::Config;
use kvregistry::server::Server;
use kvregistry::storage::Registry;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn print_banner(config: &Config) {
    println!(
        r#"
kvregistry v{} - Line-Protocol Key-Value Registry
──────────────────────────────────────────────────
Registry file : {}
Update policy : {:?}
Framing       : {:?}

Use Ctrl+C to shutdown gracefully.
"#,
        kvregistry::VERSION,
        config.file.display(),
        config.update_policy(),
        config.framing(),
    );
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    init_tracing();

    print_banner(&config);

    // Load the registry before accepting anyone
    let mut registry = Registry::new(config.update_policy());
    match registry.load(&config.file) {
        Ok(loaded) => info!(entries = loaded, "KVP registry has been loaded"),
        Err(e) => {
            let message = e.startup_message();
            error!(error = %e, "{}", message);
            anyhow::bail!(message);
        }
    }

    // Bind the TCP listener
    let address = config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    info!(address = %listener.local_addr()?, "Server is listening");

    let server = Server::new(listener, registry, config.framing());
    server.run_until_ctrl_c().await;

    info!("Server shutdown complete");
    Ok(())
}
