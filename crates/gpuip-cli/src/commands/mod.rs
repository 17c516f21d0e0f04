//! CLI command implementations

pub mod boilerplate;
pub mod probe;
pub mod run;
