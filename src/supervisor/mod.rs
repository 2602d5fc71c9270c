//! Task supervision
//!
//! - `state`: task records and their lifecycle status
//! - `registry`: shared task_id → node_id → record map with runner handles
//! - `runner`: the per-task polling loop against a remote worker
//! - `service`: create / status / stop entry points tying the above together

mod registry;
mod runner;
mod service;
mod state;

pub use registry::*;
pub use runner::*;
pub use service::*;
pub use state::*;
