//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages the runtime behavior:
//! - Entry registry (storage of per-key state)
//! - Coalescer (timers, dispatch and shutdown)
//! - Idle reclaimer (background eviction)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod coalescer;
pub mod config;
pub mod entry;
pub mod metrics;
pub mod ports;
pub(crate) mod reclaimer;
pub mod registry;
