// sia-rs daemon library
// Exposes the node kernel modules for the binary and for integration tests

#[macro_use]
extern crate log;

pub mod config;
pub mod consensus;
pub mod explorer;
pub mod gateway;
pub mod host;
pub mod miner;
pub mod node;
pub mod renter;
pub mod rpc;
pub mod tpool;
pub mod wallet;
