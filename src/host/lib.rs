//! Access to the host-local resource pools a mirror draws from: network
//! endpoints, block device geometry, sparse meta-data files and loop devices

#[macro_use]
extern crate tracing;

pub mod loopdev;
pub mod probe;
pub mod sim;
