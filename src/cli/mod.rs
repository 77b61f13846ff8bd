//! Command-line interface for the echo upstream and the pool load generator

pub mod bench;
pub mod serve;

pub use bench::*;
pub use serve::*;
