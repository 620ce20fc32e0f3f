//! Shared types for the cubegrid workspace.
//!
//! # Invariants
//! - A position record is `stride` consecutive `f32`s; the buffer is a flat
//!   array of `count` records with no gaps.
//! - Instance counts are within `1..=MAX_INSTANCE_COUNT` once validated.

mod config;
mod types;

pub use config::{ConfigError, GridConfig, MAX_WORKGROUP_SIZE};
pub use types::{MAX_INSTANCE_COUNT, PositionSnapshot, Stride};
