//! Remote worker communication
//!
//! The supervisor talks to workers over plain HTTP GETs:
//! - Progress probes for each step of a task
//! - One finish notice when the loop exits

mod client;
#[cfg(test)]
pub mod mock;

pub use client::*;
