use anyhow::{Context, Result};
use clap::Parser;
use relay_config::{RelayConfig, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug, Clone)]
#[command(name = "relayd", about = "Market data broadcast relay")]
pub struct Cli {
    #[arg(
        long,
        default_value = DEFAULT_CONFIG_PATH,
        help = "Path to relay.toml config file"
    )]
    pub config: String,
    #[arg(long = "ingest-addr", help = "Override ingest.listen_addr")]
    pub ingest_addr: Option<String>,
    #[arg(long = "ws-addr", help = "Override gateway.listen_addr")]
    pub ws_addr: Option<String>,
    #[arg(long, help = "Override gateway.mailbox_capacity")]
    pub mailbox: Option<usize>,
}

impl Cli {
    /// Applies command-line overrides on top of `config` and re-validates.
    pub fn apply_overrides(&self, config: &mut RelayConfig) -> Result<()> {
        if let Some(addr) = &self.ingest_addr {
            config.ingest.listen_addr = addr.clone();
        }
        if let Some(addr) = &self.ws_addr {
            config.gateway.listen_addr = addr.clone();
        }
        if let Some(capacity) = self.mailbox {
            config.gateway.mailbox_capacity = capacity;
        }
        config.normalize();
        config
            .validate()
            .context("invalid configuration after command-line overrides")
    }
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

#[cfg(test)]
pub(crate) fn parse_cli_from<I, T>(args: I) -> Result<Cli>
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    let args = args.into_iter().map(Into::into).collect::<Vec<String>>();
    Cli::try_parse_from(args).map_err(|err| anyhow::anyhow!(err.to_string()))
}
