pub mod analytics;
pub mod config;
pub mod distributions;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod output;
pub mod state;
pub mod tail;
pub mod tandem;
