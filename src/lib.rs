pub mod config;
pub mod error;
pub mod fsutil;
pub mod gate;
pub mod issue;
pub mod queue;
pub mod release;
pub mod report;
pub mod runner;
pub mod server;
pub mod shutdown;
pub mod webhook;
pub mod workflow;

#[cfg(test)]
mod test_support;
