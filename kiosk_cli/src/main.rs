use clap::Parser;
use kiosk_cli::{transaction, Cli};
use kiosk_runtime::{Kiosk, KioskConfig};
use tracing::error;

#[tokio::main]
async fn main() {
    let subscriber = tracing_subscriber::fmt()
        .pretty()
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("tracing subscriber should work");

    let cli = Cli::parse();
    let config = match KioskConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let kiosk = match Kiosk::start(config).await {
        Ok(kiosk) => kiosk,
        Err(e) => {
            error!("failed to start kiosk: {e}");
            std::process::exit(1);
        }
    };

    transaction::handler(&kiosk, &cli.command).await;

    if let Err(e) = kiosk.shutdown().await {
        error!("failed to shut down cleanly: {e}");
    }
}
