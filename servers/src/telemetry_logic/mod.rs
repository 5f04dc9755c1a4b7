pub mod config;
pub mod downstream;
pub mod error;
pub mod service;
pub mod state;
