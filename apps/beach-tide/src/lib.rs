pub mod app;
pub mod buffer;
pub mod cli;
pub mod collapse;
pub mod config;
pub mod error;
pub mod persistence;
pub mod session;
pub mod snapshot;
pub mod supervisor;
pub mod telemetry;
pub mod transport;
pub mod view;
