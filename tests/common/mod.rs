//! Shared helpers for the integration tests: session construction with
//! shrunken intervals and event-draining utilities.

pub mod session;
