//! Process-wide user identity used to tag join commands.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const RANDOM_LEN: usize = 11;

/// User identity shared by every context in the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
	user_id: String,
	display_name: String,
}

impl Identity {
	/// Generates a fresh identity that is never persisted.
	pub fn ephemeral() -> Self {
		let user_id = generate_user_id();
		let display_name = display_name_for(&user_id);
		Self { user_id, display_name }
	}

	/// Loads the identity stored at `path`, creating and storing one if absent.
	///
	/// Persistence is best-effort: when the file cannot be read or written the
	/// identity is still returned, it just will not survive a restart.
	pub fn load_or_create(path: Option<&Path>) -> Self {
		let Some(path) = path else {
			return Self::ephemeral();
		};

		match fs::read_to_string(path) {
			Ok(raw) => match serde_json::from_str::<Identity>(&raw) {
				Ok(stored) => {
					debug!(target = "tabrelay.identity", user_id = %stored.user_id, "loaded stored identity");
					return stored;
				}
				Err(err) => {
					warn!(target = "tabrelay.identity", path = %path.display(), error = %err, "stored identity is malformed; replacing it with a new id");
				}
			},
			Err(err) if err.kind() == ErrorKind::NotFound => {}
			Err(err) => debug!(target = "tabrelay.identity", path = %path.display(), error = %err, "cannot read stored identity"),
		}

		let identity = Self::ephemeral();
		if let Err(err) = identity.store(path) {
			warn!(target = "tabrelay.identity", path = %path.display(), error = %err, "identity storage unavailable; using temporary id");
		}
		identity
	}

	fn store(&self, path: &Path) -> std::io::Result<()> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		let json = serde_json::to_string_pretty(self)?;
		fs::write(path, json)
	}

	pub fn user_id(&self) -> &str {
		&self.user_id
	}

	pub fn display_name(&self) -> &str {
		&self.display_name
	}
}

fn generate_user_id() -> String {
	let mut rng = rand::rng();
	let random: String = (0..RANDOM_LEN).map(|_| BASE36[rng.random_range(0..BASE36.len())] as char).collect();
	let millis = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or_default();
	format!("user_{random}{}", to_base36(millis))
}

fn display_name_for(user_id: &str) -> String {
	let tag: String = user_id.chars().skip(5).take(4).collect();
	format!("User{tag}")
}

fn to_base36(mut value: u128) -> String {
	if value == 0 {
		return "0".to_string();
	}
	let mut digits = Vec::new();
	while value > 0 {
		digits.push(BASE36[(value % 36) as usize]);
		value /= 36;
	}
	digits.reverse();
	String::from_utf8(digits).unwrap_or_default()
}
