pub mod catalog;
pub mod config;
pub mod error;
pub mod platform;
pub mod session;
