pub mod checks;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod logging;
pub mod pool;
pub mod reporter;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod stats;
pub mod trend;

#[cfg(test)]
pub mod testutil;
