pub mod commands;
pub mod config;
pub mod exchange;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod schedule;
pub mod state;
pub mod trading;
