pub mod config;
pub mod cors;
pub mod handler;
pub mod router;
pub mod submission;
pub mod telemetry;
