// crates/bpcore/src/events/mod.rs

mod base;

pub use base::{EventBus, EventForwarder, ExecutionEvent};
