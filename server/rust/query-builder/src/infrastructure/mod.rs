pub mod config;
pub mod database;
pub mod metrics;
pub mod persistence;
pub mod telemetry;
