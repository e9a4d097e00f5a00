//! Side-effecting adapters: the client surface, time, files on disk.

pub mod clock;
pub mod config;
pub mod init;
pub mod run_log;
pub mod store;
pub mod surface;
