pub mod config;
pub mod error;
pub mod lifecycle;
pub mod runner;
pub mod service;
pub mod telemetry;
