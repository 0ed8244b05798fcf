use tracing_subscriber::EnvFilter;

/// Default filter for a `-v` count: warnings only, then relay info, then relay debug.
pub fn default_directive(verbose: u8) -> String {
	match verbose {
		0 => "warn".to_string(),
		1 => "warn,tabrelay=info".to_string(),
		_ => "info,tabrelay=debug".to_string(),
	}
}

/// Installs the stderr subscriber. `RUST_LOG` wins over `-v` when set.
pub fn init_logging(verbose: u8) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(true)
		.init();
}
