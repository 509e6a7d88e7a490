pub mod common;
pub mod completions;
pub mod config;
pub mod delete;
pub mod export;
pub mod list;
pub mod session;
pub mod status;
pub mod sync;
