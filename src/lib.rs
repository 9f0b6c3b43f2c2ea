pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod output;
pub mod pipeline;
pub mod record;
