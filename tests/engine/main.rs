#[path = "../common/mod.rs"]
mod common;

mod admission;
mod atomicity;
mod batching;
mod config_file;
mod get_object;
mod metrics;
mod reentrancy;
mod regression;
mod reporting;
