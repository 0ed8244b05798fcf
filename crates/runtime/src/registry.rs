//! Which room each execution context wants events for.

use std::collections::HashMap;

use tabrelay_protocol::{ContextId, RoomId};

/// Mapping from context id to its current room.
///
/// A context that is present with `None` has initialised but not joined a
/// room; it still receives broadcasts. Pure state: no I/O, no side effects.
#[derive(Debug, Default, Clone)]
pub struct RoomRegistry {
	rooms: HashMap<ContextId, Option<RoomId>>,
}

impl RoomRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts or replaces the room for `context`.
	pub fn upsert(&mut self, context: ContextId, room: Option<RoomId>) {
		self.rooms.insert(context, room);
	}

	/// Room of `context`, or `None` when it is unknown or has no room.
	pub fn get(&self, context: ContextId) -> Option<&RoomId> {
		self.rooms.get(&context).and_then(Option::as_ref)
	}

	pub fn contains(&self, context: ContextId) -> bool {
		self.rooms.contains_key(&context)
	}

	/// Removes `context`; returns whether it was tracked.
	pub fn remove(&mut self, context: ContextId) -> bool {
		self.rooms.remove(&context).is_some()
	}

	/// Snapshot of every tracked context. Order is unspecified.
	pub fn list_contexts(&self) -> Vec<ContextId> {
		self.rooms.keys().copied().collect()
	}

	pub fn len(&self) -> usize {
		self.rooms.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rooms.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn joining_replaces_the_previous_room() {
		let mut registry = RoomRegistry::new();
		let tab = ContextId::tab(1);
		registry.upsert(tab, Some(RoomId::new("a")));
		registry.upsert(tab, Some(RoomId::new("b")));

		assert_eq!(registry.get(tab), Some(&RoomId::new("b")));
		assert_eq!(registry.len(), 1);
	}

	#[test]
	fn initialised_context_without_room_is_listed() {
		let mut registry = RoomRegistry::new();
		registry.upsert(ContextId::tab(1), None);

		assert_eq!(registry.get(ContextId::tab(1)), None);
		assert!(registry.contains(ContextId::tab(1)));
		assert_eq!(registry.list_contexts(), vec![ContextId::tab(1)]);
	}

	#[test]
	fn remove_is_idempotent() {
		let mut registry = RoomRegistry::new();
		registry.upsert(ContextId::tab(1), Some(RoomId::new("lobby")));
		registry.upsert(ContextId::tab(2), Some(RoomId::new("lobby")));

		assert!(registry.remove(ContextId::tab(1)));
		assert!(!registry.remove(ContextId::tab(1)));
		assert_eq!(registry.list_contexts(), vec![ContextId::tab(2)]);
		assert_eq!(registry.get(ContextId::tab(2)), Some(&RoomId::new("lobby")));
	}
}
