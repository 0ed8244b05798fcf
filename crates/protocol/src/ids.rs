//! Opaque identifiers shared across boundaries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Host-assigned id of an execution context.
///
/// A context is a tab (`frame == 0`) or a frame nested inside one. Only
/// top-level contexts talk to the relay directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId {
	pub tab: u32,
	#[serde(default)]
	pub frame: u32,
}

impl ContextId {
	/// Top-level context of `tab`.
	pub const fn tab(tab: u32) -> Self {
		Self { tab, frame: 0 }
	}

	/// Nested frame `frame` inside `tab`.
	pub const fn frame(tab: u32, frame: u32) -> Self {
		Self { tab, frame }
	}

	pub const fn is_top_level(&self) -> bool {
		self.frame == 0
	}
}

impl fmt::Display for ContextId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_top_level() {
			write!(f, "tab:{}", self.tab)
		} else {
			write!(f, "tab:{}/frame:{}", self.tab, self.frame)
		}
	}
}

/// Logical channel on the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for RoomId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

impl From<String> for RoomId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// Frame inside one tab's frame tree. `FrameId(0)` is the top frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(pub u32);

impl FrameId {
	pub const TOP: FrameId = FrameId(0);
}

impl fmt::Display for FrameId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "frame#{}", self.0)
	}
}
