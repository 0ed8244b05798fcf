use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tabrelay")]
#[command(about = "Shared chat relay for sandboxed browser contexts")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Config file (defaults to <config dir>/tabrelay/config.json)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Check backend health and pick an endpoint
	Probe {
		/// Probe only this URL
		#[arg(long)]
		url: Option<String>,
		/// Local backend URL to try first
		#[arg(long)]
		local: Option<String>,
		/// Production backend URL used when the local one is down
		#[arg(long)]
		production: Option<String>,
	},

	/// Inspect or create the config file
	Config {
		#[command(subcommand)]
		action: ConfigAction,
	},

	/// Run a relay driven by JSON lines on stdin; events are written to stdout
	Relay {
		/// Chat service endpoint (overrides config and detection)
		#[arg(long)]
		endpoint: Option<String>,
	},
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
	/// Print the effective configuration
	Show,
	/// Print the config file location
	Path,
	/// Write a config file with default values
	Init {
		/// Overwrite an existing file
		#[arg(long, short)]
		force: bool,
	},
}
