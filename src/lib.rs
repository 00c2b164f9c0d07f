pub mod config;
pub mod database;
pub mod error;
pub mod forwarder;
pub mod host;
pub mod load_reader;
pub mod membership;
pub mod models;
pub mod reconciler;
pub mod registry;
pub mod routes;
pub mod sampler;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod store;
pub mod supervisor;
