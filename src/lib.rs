pub mod backend;
pub mod chat;
pub mod cli;
pub mod config;
pub mod models;
pub mod prompt;
pub mod session;
pub mod storage;
pub mod transport;
