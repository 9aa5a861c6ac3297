pub mod auth;
pub mod config;
pub mod engine;
pub mod http;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod repository;
pub mod rooms;
pub mod server;
pub mod store;
pub mod tenant;
pub mod ws;
