use action_relay::{config::Config, telemetry::init_tracing, worker};
use anyhow::{Error, Result};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing(config.log_format);

    let _ = rustls::crypto::ring::default_provider().install_default();

    worker::run(config).await
}
