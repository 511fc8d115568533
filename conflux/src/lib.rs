//! Conflux - request collapsing and resilient caching for
//! high-throughput service clients.
//!
//! Two subsystems share one discipline: wrapping a slow asynchronous
//! boundary with batching, deadlines, circuit breaking, and metrics.
//!
//! - [`collapser`] buffers concurrent single-item requests into
//!   batches under size and time bounds, invokes a bulk provider, and
//!   demultiplexes the results back to the original callers.
//! - [`cache`] composes a per-operation timeout and a shared circuit
//!   breaker over any asynchronous cache backend.
//!
//! Supporting modules: [`metrics`] (hierarchical and dimensional meter
//! registry), [`context`] (diagnostic-context propagation across
//! executor hops), [`clock`] (injectable time source), and [`logging`]
//! (subscriber setup).

pub mod cache;
pub mod clock;
pub mod collapser;
pub mod context;
pub mod logging;
pub mod metrics;

/// Version of the conflux library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
