#[macro_use]
extern crate tracing;

pub mod cli;
pub mod cloud_api;
pub mod config;
pub mod engine;
pub mod errors;
pub mod logger;
pub mod model;
pub mod orchestrator;
pub mod renderer;
pub mod tera_filters;
