use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use tabrelay_runtime::RelayConfig;
use tabrelay_runtime::config::default_config_path;

pub fn show(config: &RelayConfig) -> anyhow::Result<()> {
	println!("{}", serde_json::to_string_pretty(config)?);
	Ok(())
}

pub fn path(explicit: Option<&Path>) -> anyhow::Result<()> {
	println!("{}", resolve(explicit)?.display());
	Ok(())
}

pub fn init(explicit: Option<&Path>, force: bool) -> anyhow::Result<()> {
	let path = resolve(explicit)?;
	write_default(&path, force)?;
	println!("Wrote {}", path.display());
	Ok(())
}

fn resolve(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
	explicit
		.map(Path::to_path_buf)
		.or_else(default_config_path)
		.context("no config directory on this platform; pass --config")
}

fn write_default(path: &Path, force: bool) -> anyhow::Result<()> {
	if path.exists() && !force {
		bail!("{} already exists (use --force to overwrite)", path.display());
	}
	RelayConfig::default()
		.save(path)
		.with_context(|| format!("failed to write {}", path.display()))
}
