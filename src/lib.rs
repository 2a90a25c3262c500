pub mod analysis;
pub mod config;
pub mod error;
pub mod frame;
pub mod pose;
pub mod protocol;
pub mod replay;
pub mod rom;
pub mod server;
pub mod session;
pub mod tracker;
