//! Standard process library
//!
//! Collection of built-in process handlers for common operations

mod control;
mod debug;
mod time;

pub use control::{FailProcess, NoopProcess};
pub use debug::DebugProcess;
pub use time::DelayProcess;

use bpruntime::ProcessRegistry;
use std::sync::Arc;

/// Register all standard processes with a registry
pub fn register_all(registry: &mut ProcessRegistry) {
    registry.register(Arc::new(DebugProcess));
    registry.register(Arc::new(DelayProcess));
    registry.register(Arc::new(NoopProcess));
    registry.register(Arc::new(FailProcess));
}
