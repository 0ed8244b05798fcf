//! Request/response relay across one tab's tree of frames.
//!
//! Frames share no memory and exchange serialized strings through
//! [`FramePort`]s. A [`ContractCall`] may originate in any frame; it is
//! forwarded parent by parent until it reaches the top frame, which is the
//! only frame that acts on it. The answer is broadcast to the whole tree: the
//! top frame's own listeners, the page embedding the tab (if any) and every
//! descendant. Frames attached later are discovered through
//! [`FrameBridge::observe`], which re-announces readiness so late frames can
//! retry.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tabrelay_protocol::{BridgeMessage, ContractCall, ContractResponse, FrameId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::BridgeError;

/// Marker a bridge leaves in its realm.
pub const BRIDGE_SENTINEL: &str = "__tabrelay_bridge_active__";

/// Global scope shared by every script injected into one document.
#[derive(Debug, Default)]
pub struct Realm {
	markers: Mutex<HashSet<String>>,
}

impl Realm {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_marked(&self, marker: &str) -> bool {
		self.markers.lock().contains(marker)
	}

	/// Sets `marker`, returning `false` if it was already set.
	fn mark(&self, marker: &str) -> bool {
		self.markers.lock().insert(marker.to_string())
	}
}

/// Where a frame receives posted envelopes.
pub trait FramePort: Send {
	fn post(&self, message: &str) -> Result<(), BridgeError>;
}

/// [`FramePort`] feeding an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelPort(pub mpsc::UnboundedSender<String>);

impl FramePort for ChannelPort {
	fn post(&self, message: &str) -> Result<(), BridgeError> {
		self.0.send(message.to_string()).map_err(|_| BridgeError::PortClosed)
	}
}

/// A change to the document tree.
pub enum FrameMutation {
	Attached {
		parent: FrameId,
		frame: FrameId,
		port: Box<dyn FramePort>,
	},
	Detached(FrameId),
}

struct FrameNode {
	parent: Option<FrameId>,
	children: Vec<FrameId>,
	port: Box<dyn FramePort>,
}

/// Bridge for one tab, living in its top frame.
pub struct FrameBridge {
	app_id: String,
	max_depth: usize,
	frames: HashMap<FrameId, FrameNode>,
	embedder: Option<Box<dyn FramePort>>,
}

impl FrameBridge {
	/// Activates the bridge in `realm`. Fails with [`BridgeError::AlreadyActive`]
	/// if a bridge was already activated there.
	pub fn install(realm: &Realm, app_id: impl Into<String>, max_depth: usize, top: Box<dyn FramePort>) -> Result<Self, BridgeError> {
		if !realm.mark(BRIDGE_SENTINEL) {
			debug!(target = "tabrelay.bridge", "bridge already active, skipping");
			return Err(BridgeError::AlreadyActive);
		}

		let mut frames = HashMap::new();
		frames.insert(
			FrameId::TOP,
			FrameNode {
				parent: None,
				children: Vec::new(),
				port: top,
			},
		);
		Ok(Self {
			app_id: app_id.into(),
			max_depth,
			frames,
			embedder: None,
		})
	}

	/// Sets the port of the page embedding this tab's top frame.
	pub fn with_embedder(mut self, port: Box<dyn FramePort>) -> Self {
		self.embedder = Some(port);
		self
	}

	pub fn app_id(&self) -> &str {
		&self.app_id
	}

	pub fn frame_count(&self) -> usize {
		self.frames.len()
	}

	pub fn contains(&self, frame: FrameId) -> bool {
		self.frames.contains_key(&frame)
	}

	/// Attaches `frame` under `parent`. Re-attaching a known frame moves it.
	pub fn attach(&mut self, parent: FrameId, frame: FrameId, port: Box<dyn FramePort>) -> Result<(), BridgeError> {
		if frame == FrameId::TOP || frame == parent {
			return Err(BridgeError::Malformed(format!("cannot attach {frame} under {parent}")));
		}
		if self.is_ancestor(frame, parent) {
			return Err(BridgeError::Cycle { frame, parent });
		}
		let depth = self.depth_of(parent)? + 1;
		if depth > self.max_depth {
			return Err(BridgeError::DepthExceeded(self.max_depth));
		}

		if let Some(old) = self.frames.remove(&frame) {
			self.unlink(frame, old.parent);
		}
		if let Some(node) = self.frames.get_mut(&parent) {
			node.children.push(frame);
		}
		let children = self
			.frames
			.iter()
			.filter(|(_, node)| node.parent == Some(frame))
			.map(|(id, _)| *id)
			.collect();
		self.frames.insert(
			frame,
			FrameNode {
				parent: Some(parent),
				children,
				port,
			},
		);
		debug!(target = "tabrelay.bridge", %frame, %parent, depth, "frame attached");
		Ok(())
	}

	/// Removes `frame` and its whole subtree, returning how many frames went away.
	pub fn detach(&mut self, frame: FrameId) -> usize {
		if frame == FrameId::TOP {
			return 0;
		}
		let Some(node) = self.frames.remove(&frame) else {
			return 0;
		};
		self.unlink(frame, node.parent);

		let mut removed = 1;
		let mut stack = node.children;
		while let Some(id) = stack.pop() {
			if let Some(child) = self.frames.remove(&id) {
				removed += 1;
				stack.extend(child.children);
			}
		}
		debug!(target = "tabrelay.bridge", %frame, removed, "frame detached");
		removed
	}

	/// Number of hops from `frame` up to the top frame.
	pub fn depth_of(&self, frame: FrameId) -> Result<usize, BridgeError> {
		let mut visited = HashSet::new();
		let mut current = frame;
		let mut depth = 0;
		loop {
			let node = self.frames.get(&current).ok_or(if current == frame {
				BridgeError::UnknownFrame(frame)
			} else {
				BridgeError::Detached(frame)
			})?;
			let Some(parent) = node.parent else {
				return if current == FrameId::TOP { Ok(depth) } else { Err(BridgeError::Detached(frame)) };
			};
			if !visited.insert(current) {
				return Err(BridgeError::Detached(frame));
			}
			depth += 1;
			if depth > self.max_depth {
				return Err(BridgeError::DepthExceeded(self.max_depth));
			}
			current = parent;
		}
	}

	/// Carries a raw envelope posted in `origin` up to the top frame.
	///
	/// Returns the call the top frame should serve, or `None` when the envelope
	/// is not a call or is addressed to another application.
	pub fn relay_call(&self, origin: FrameId, raw: &str) -> Result<Option<ContractCall>, BridgeError> {
		let message = BridgeMessage::from_json(raw).map_err(|err| BridgeError::Malformed(err.to_string()))?;
		let BridgeMessage::ContractCall { payload } = message else {
			return Ok(None);
		};
		if payload.target_id != self.app_id {
			debug!(target = "tabrelay.bridge", target_id = %payload.target_id, "ignoring call for another application");
			return Ok(None);
		}

		let hops = self.depth_of(origin)?;
		debug!(target = "tabrelay.bridge", %origin, hops, method = %payload.method, "call reached top frame");
		Ok(Some(payload))
	}

	pub fn respond(&self, response: ContractResponse) -> Result<usize, BridgeError> {
		self.broadcast(&BridgeMessage::ContractResponse(response))
	}

	pub fn announce_ready(&self) -> Result<usize, BridgeError> {
		self.broadcast(&BridgeMessage::BridgeReady { timestamp: now_millis() })
	}

	/// Posts `message` to the top frame, the embedder and every descendant.
	///
	/// Failed posts are skipped. Returns the number of successful posts.
	pub fn broadcast(&self, message: &BridgeMessage) -> Result<usize, BridgeError> {
		let raw = message.to_json().map_err(|err| BridgeError::Malformed(err.to_string()))?;
		let mut delivered = 0;

		let mut post = |label: &str, port: &dyn FramePort| match port.post(&raw) {
			Ok(()) => delivered += 1,
			Err(err) => debug!(target = "tabrelay.bridge", frame = label, error = %err, "post failed"),
		};

		if let Some(embedder) = &self.embedder {
			post("embedder", embedder.as_ref());
		}

		let mut visited = HashSet::new();
		let mut stack = vec![(FrameId::TOP, 0usize)];
		while let Some((id, depth)) = stack.pop() {
			if depth > self.max_depth || !visited.insert(id) {
				continue;
			}
			let Some(node) = self.frames.get(&id) else {
				continue;
			};
			post(&id.to_string(), node.port.as_ref());
			stack.extend(node.children.iter().map(|child| (*child, depth + 1)));
		}
		Ok(delivered)
	}

	/// Applies document-tree mutations, announcing readiness once if any frame
	/// was attached. Returns the number of frames attached.
	pub fn observe(&mut self, mutations: Vec<FrameMutation>) -> usize {
		let mut attached = 0;
		for mutation in mutations {
			match mutation {
				FrameMutation::Attached { parent, frame, port } => match self.attach(parent, frame, port) {
					Ok(()) => attached += 1,
					Err(err) => warn!(target = "tabrelay.bridge", %frame, %parent, error = %err, "cannot attach frame"),
				},
				FrameMutation::Detached(frame) => {
					self.detach(frame);
				}
			}
		}
		if attached > 0 {
			if let Err(err) = self.announce_ready() {
				warn!(target = "tabrelay.bridge", error = %err, "readiness announcement failed");
			}
		}
		attached
	}

	/// `true` if `ancestor` lies on the parent chain of `frame`.
	fn is_ancestor(&self, ancestor: FrameId, frame: FrameId) -> bool {
		let mut visited = HashSet::new();
		let mut current = self.frames.get(&frame).and_then(|node| node.parent);
		while let Some(id) = current {
			if id == ancestor {
				return true;
			}
			if !visited.insert(id) {
				return false;
			}
			current = self.frames.get(&id).and_then(|node| node.parent);
		}
		false
	}

	fn unlink(&mut self, frame: FrameId, parent: Option<FrameId>) {
		if let Some(node) = parent.and_then(|parent| self.frames.get_mut(&parent)) {
			node.children.retain(|child| *child != frame);
		}
	}
}

fn now_millis() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or_default()
}
