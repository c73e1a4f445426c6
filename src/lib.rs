pub mod api;
pub mod auth;
pub mod calendar;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod progress;
pub mod server;
pub mod ws;
