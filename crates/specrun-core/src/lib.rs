pub mod catalog;
pub mod config;
pub mod deps;
pub mod error;
pub mod executor;
pub mod io;
pub mod orchestrator;
pub mod paths;
pub mod schedule;
pub mod selector;
pub mod task;
pub mod types;
pub mod validate;

pub use error::{Result, SpecrunError};
