pub mod app;
pub mod auth;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod middleware;
