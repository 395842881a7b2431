pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod models;
pub mod monitor;
pub mod normalize;
pub mod queue;
pub mod routes;
pub mod scrape;
pub mod service;
pub mod store;
