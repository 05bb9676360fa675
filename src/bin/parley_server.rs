//! HTTP server binary for parley.
//!
//! Usage: `parley-server [CONFIG_PATH]`. Without a path the default config
//! location is used when it exists. Secrets come from the environment.

use std::path::PathBuf;

use parley::{ChatPipeline, ChatServer, ParleyConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; RUST_LOG overrides the default filter.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("parley=info,tower_http=warn,hyper=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(std::env::args().nth(1).map(PathBuf::from))?;
    let bind_addr = config.server.bind_addr.clone();

    let pipeline = ChatPipeline::from_config(config)?;
    info!(pipeline = ?pipeline, "pipeline ready");

    let mut server = ChatServer::start(pipeline, &bind_addr).await?;
    println!("parley v{} listening on http://{}", env!("CARGO_PKG_VERSION"), server.addr());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.shutdown();
    server.stopped().await;
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<ParleyConfig> {
    let mut config = match path {
        Some(path) => ParleyConfig::from_file(&path)?,
        None => {
            let default_path = ParleyConfig::default_config_path();
            if default_path.exists() {
                ParleyConfig::from_file(&default_path)?
            } else {
                ParleyConfig::default()
            }
        }
    };
    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
