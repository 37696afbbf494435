pub mod config;
pub mod error;
pub mod join;
pub mod loader;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod records;
pub mod window;
