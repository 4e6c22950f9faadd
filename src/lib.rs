#![forbid(unsafe_code)]

pub mod app;
pub mod assemble;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod formats;
pub mod locate;
pub mod logging;
pub mod render;
pub mod templater;
pub mod worker;
