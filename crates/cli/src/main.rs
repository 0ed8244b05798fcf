use clap::Parser;
use tabrelay_cli::cli::Cli;
use tabrelay_cli::{commands, logging};
use tracing::error;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::dispatch(cli).await {
		error!(target = "tabrelay", error = %format_args!("{err:#}"), "command failed");
		std::process::exit(1);
	}
}
