mod cli;
mod config_io;
mod daemon;

use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    init_tracing();

    let cli = cli::parse_cli();
    if let Err(err) = daemon::run_daemon(cli).await {
        error!(error = %err, "relayd exited with error");
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
