//! Crate containing common types and functions shared by all tandem crates

#[macro_use]
extern crate tracing;

pub mod error;
pub mod process;
