use brokersync::client::BrokerClient;
use brokersync::config::AppConfig;
use brokersync::domain::{Credentials, MarketDataField};
use brokersync::error::Result;
use brokersync::logging::init_logging;
use brokersync::session::Resume;
use brokersync::transport::GatewayClient;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            warn!("config error: {e}");
        }
        return Err(brokersync::error::BrokerError::Validation(errors.join("; ")));
    }

    let gateway = Arc::new(GatewayClient::new(&config.gateway)?);
    let client = BrokerClient::new(gateway, &config);

    // Credentials come from the environment; they are held in memory only
    // and never written to disk.
    let credentials = load_credentials();

    match client.startup_resume(credentials.clone()).await? {
        Resume::AutoConnect(record) => {
            info!(session_id = %record.session_id, "resumed persisted session");
        }
        Resume::Available(record) => {
            info!(
                session_id = %record.session_id,
                "previous session available, connecting manually"
            );
            if let Some((creds, token)) = credentials {
                client.connect(creds, token).await?;
            }
        }
        Resume::None => {
            info!("no resumable session, connecting fresh");
            match credentials {
                Some((creds, token)) => client.connect(creds, token).await?,
                None => {
                    warn!("BROKERSYNC_USERNAME / BROKERSYNC_TOKEN not set, nothing to do");
                    return Ok(());
                }
            }
        }
    }

    let watchlist: Vec<String> = std::env::var("BROKERSYNC_WATCHLIST")
        .unwrap_or_else(|_| "AAPL,MSFT,SPY".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    client
        .subscribe_market_data(watchlist.clone(), Some(MarketDataField::default_set()))
        .await?;
    client.refresh_positions().await?;
    client.refresh_account().await?;
    info!(symbols = ?watchlist, "streaming market data, ctrl-c to stop");

    signal::ctrl_c().await?;

    let portfolio = client.portfolio();
    info!(
        total_value = %portfolio.total_value,
        unrealized_pnl = %portfolio.unrealized_pnl,
        "shutting down"
    );
    client.disconnect().await?;
    Ok(())
}

fn load_credentials() -> Option<(Credentials, String)> {
    let username = std::env::var("BROKERSYNC_USERNAME").ok()?;
    let token = std::env::var("BROKERSYNC_TOKEN").ok()?;
    let account = std::env::var("BROKERSYNC_ACCOUNT").ok();
    let client_id = std::env::var("BROKERSYNC_CLIENT_ID")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    Some((
        Credentials {
            username,
            account,
            client_id,
        },
        token,
    ))
}
