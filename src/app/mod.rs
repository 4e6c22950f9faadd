pub mod api;
pub mod catalog_store;
pub mod model;
pub mod queue;
pub mod runner;
