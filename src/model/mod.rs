//! Domain objects for the task graph, worker pool, run tracking, learning
//! store, and anchor subsystem. Statuses are snake_case serde enums with
//! `as_str`/`Display`/`FromStr` round-trips so repositories can persist
//! them as plain text columns.

pub mod anchor;
pub mod cursor;
pub mod edge;
pub mod learning;
pub mod run;
pub mod task;
pub mod worker;

use serde::{Deserialize, Deserializer};

/// Distinguish "field absent" from "field set to null" in PATCH bodies.
/// Absent stays `None`; an explicit null becomes `Some(None)`.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}
