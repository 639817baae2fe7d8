pub mod app;
pub mod archive;
pub mod client;
pub mod config;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod ncbi;
pub mod output;
pub mod rate_limit;
pub mod retrieval;
pub mod selection;
pub mod server;
