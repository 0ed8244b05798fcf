//! Envelope types for the tabrelay boundaries.
//!
//! Every message that crosses a boundary in tabrelay has its own shape here:
//!
//! * [`wire`]: frames exchanged with the remote chat service over the shared connection
//! * [`context`]: commands a context sends to the relay and events the relay delivers back
//! * [`bridge`]: envelopes posted between frames of one tab's frame tree
//!
//! Types in this crate are pure data. Translation between boundaries happens in
//! `tabrelay-runtime`; nothing here assumes two boundaries share a shape.

pub mod bridge;
pub mod context;
pub mod ids;
pub mod wire;

pub use bridge::*;
pub use context::*;
pub use ids::*;
pub use wire::*;
