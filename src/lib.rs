//! Stream consumption progress, health gauges and network indexing status
//! for indexers.

pub mod agent;
pub mod calc;
pub mod config;
pub mod demo;
pub mod export;
pub mod gauge;
pub mod progress;
pub mod status;
