pub mod adapters;
pub mod config;
pub mod engine;
pub mod error;
pub mod ports;
pub mod services;
pub mod summary;

#[cfg(test)]
mod testing;
