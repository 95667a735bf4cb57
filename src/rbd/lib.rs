//! Control layer for the kernel replicated block driver: parsing its status
//! file, writing its configuration, and driving it through the command
//! sequence that brings a mirror up — either for real through the userspace
//! control tool, or in memory for the test suites

#[macro_use]
extern crate tracing;

pub mod conf;
pub mod control;
pub mod driver;
pub mod mirror;
pub mod sim;
pub mod status;
