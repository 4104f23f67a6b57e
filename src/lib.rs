pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod lock;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod services;
pub mod state;
pub mod store;
pub mod util;
