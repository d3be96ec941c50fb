//! Integration tests driving a whole session (middleman plus simulated
//! children) through the debugger-facing API.

#[path = "../common/mod.rs"]
pub mod common;

pub mod divergence;
pub mod recording;
pub mod recovery;
pub mod rewind;
