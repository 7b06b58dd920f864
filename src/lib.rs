pub mod error;
pub mod config;
pub mod drive;
pub mod identity;
pub mod permission;
pub mod server;
