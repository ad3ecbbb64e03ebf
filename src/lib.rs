pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod middleware;
pub mod models;
pub mod policy;
pub mod routes;
pub mod store;
pub mod sweeper;
