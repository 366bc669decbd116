pub mod config;
pub mod harness;
pub mod pump;

pub use config::{Backend, HarnessConfig};
pub use harness::{Harness, RunReport, exit_status};
