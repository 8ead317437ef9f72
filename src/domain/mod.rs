//! Domain layer - pure coalescing logic with no runtime dependencies.
//!
//! - Trigger and shutdown modes
//! - The per-key trigger policy (update and expiry decisions)
//!
//! Everything here is synchronous and deterministic; time enters only as
//! durations handed in by the caller.

pub mod mode;
pub mod trigger;
