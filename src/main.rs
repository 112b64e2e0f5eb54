use std::sync::Arc;

use meetscribe::{Config, Session};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load()?;
    log::info!(
        "starting meetscribe against {} (refresh every {}s)",
        config.backend_base_url,
        config.refresh_interval_secs
    );

    // the refresh interval's first tick fires immediately
    let session = Arc::new(Session::new(config));
    session.start();

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    session.shutdown();
    Ok(())
}
