//! Transporting peers over HTTP: the wire encoding, the serving shim with
//! its peer registry, and the client-side proxy a negotiator talks to

#[macro_use]
extern crate tracing;

pub mod client;
pub mod proto;
pub mod server;
