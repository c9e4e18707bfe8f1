pub mod client;
pub mod config;
pub mod controller;
pub mod metrics;
pub mod runtime;
pub mod safe_mode;
pub mod shutdown;

#[cfg(test)]
mod testing;
