//! Re-exports the observability ecosystem used across this workspace, so
//! every crate depends on one internal crate for its logging macros instead
//! of pinning `tracing` independently.

pub use tracing;
