//! Anchor subsystem: attach learnings to code locations, verify those
//! locations as the tree changes, self-heal minor edits, and keep an
//! append-only audit of every status transition.

pub mod service;
pub mod verify;

pub use service::AnchorService;
pub use verify::{SELF_HEAL_THRESHOLD, Verification};
