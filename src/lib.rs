pub mod backend;
pub mod capabilities;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod job;
pub mod protocol;
pub mod proxy;
pub mod scheduler;
pub mod transport;
