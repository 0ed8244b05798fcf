mod config;
mod probe;
pub mod relay;

use tabrelay_runtime::RelayConfig;

use crate::cli::{Cli, Commands, ConfigAction};

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
	let config = RelayConfig::load(cli.config.as_deref());
	match cli.command {
		Commands::Probe { url, local, production } => probe::execute(&config, url, local, production).await,
		Commands::Config { action } => match action {
			ConfigAction::Show => config::show(&config),
			ConfigAction::Path => config::path(cli.config.as_deref()),
			ConfigAction::Init { force } => config::init(cli.config.as_deref(), force),
		},
		Commands::Relay { endpoint } => relay::execute(config, endpoint).await,
	}
}
