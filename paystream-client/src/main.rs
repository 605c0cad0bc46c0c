use dotenv::dotenv;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod config;
mod stream;
mod wallet;
mod x402;

#[cfg(test)]
mod test_support;

use config::{mask, Config};
use stream::{strategy_for, EventSink, LogSink, PaymentNegotiator, SessionConnection};
use wallet::{EnvWalletProvider, WalletProvider};
use x402::{PaymentSigner, X402Client, X402Signer};

#[tokio::main]
async fn main() {
    dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // logger not configured yet
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    env_logger::Builder::new()
        .filter_level(config.log_level)
        .parse_default_env()
        .init();

    log::debug!("Loaded {:?}", config);

    if let Err(e) = run(config).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), String> {
    let wallet: Arc<dyn WalletProvider> =
        Arc::new(EnvWalletProvider::from_private_key(&config.private_key)?);
    log::info!(
        "Wallet ready ({}): {}",
        wallet.mode_name(),
        wallet.get_address()
    );

    let signer: Arc<dyn PaymentSigner> = Arc::new(X402Signer::new(wallet));
    let client = Arc::new(X402Client::new(signer, config.max_payment)?);

    let negotiator = PaymentNegotiator::new(client.clone(), &config.base_url);
    let descriptor = negotiator
        .acquire_session(&config.schema_path)
        .await
        .map_err(|e| e.to_string())?;
    log::info!(
        "Session acquired for stream '{}' ({}), token {}",
        descriptor.stream_id,
        descriptor.schema_version,
        mask(&descriptor.token)
    );

    let renewal_url = negotiator.renewal_url(&descriptor);
    let strategy = strategy_for(config.renewal_method, client, renewal_url);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let sink: Box<dyn EventSink> = Box::new(LogSink);
    let mut session =
        SessionConnection::new(&config, descriptor, strategy, sink).with_cancellation(cancel);
    let result = session.run().await.map_err(|e| e.to_string());

    let token = session.token();
    log::info!(
        "Session {} with token {} (expires {})",
        session.state(),
        mask(&token.token),
        token
            .expires_at
            .as_ref()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );

    match serde_json::to_string(session.stats()) {
        Ok(stats) => log::info!("Session stats: {}", stats),
        Err(e) => log::warn!("Failed to encode session stats: {}", e),
    }
    result
}
