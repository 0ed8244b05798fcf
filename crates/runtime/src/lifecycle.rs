//! Pruning of contexts the host has torn down.

use tabrelay_protocol::ContextId;
use tracing::debug;

use crate::registry::RoomRegistry;

/// Context lifecycle notices reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostNotification {
	/// The context was closed.
	Removed(ContextId),
	/// The context started loading a new document. It re-registers with a
	/// fresh `Init` once the new document runs.
	Reloading(ContextId),
}

impl HostNotification {
	pub fn context(&self) -> ContextId {
		match self {
			HostNotification::Removed(context) | HostNotification::Reloading(context) => *context,
		}
	}
}

/// Removes contexts from the registry when the host reports them gone.
#[derive(Debug, Default)]
pub struct ContextLifecycleTracker {
	pruned: u64,
}

impl ContextLifecycleTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Applies `notification`, returning `true` if a registration was removed.
	/// Repeated notices for the same context are no-ops.
	pub fn observe(&mut self, registry: &mut RoomRegistry, notification: HostNotification) -> bool {
		let context = notification.context();
		let removed = registry.remove(context);
		if removed {
			self.pruned += 1;
			debug!(target = "tabrelay.lifecycle", context = %context, ?notification, "context pruned");
		}
		removed
	}

	/// Number of registrations removed so far.
	pub fn pruned(&self) -> u64 {
		self.pruned
	}
}
