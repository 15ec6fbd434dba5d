// src/core/mod.rs

pub mod application;
pub mod builtin_steps;
pub mod config_source;
pub mod ingestion;
pub mod interpolator;
pub mod logging;
pub mod registry;
pub mod step;
pub mod task_executor;
pub mod value;
