//! The negotiation layer: stateful peers owning host-local resources, and
//! the retry protocol that drives two of them to a conflict-free mirror

#[macro_use]
extern crate tracing;

pub mod device;
pub mod endpoint;
pub mod negotiate;
pub mod peer;
