pub mod config;
pub mod daily;
pub mod error;
pub mod features;
pub mod model;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod resample;
pub mod snapshot;
pub mod store;
