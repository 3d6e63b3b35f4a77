// src/lib.rs
// Library interface for certspotter-sd
pub mod certspotter;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod export;
pub mod metrics;
pub mod version;
