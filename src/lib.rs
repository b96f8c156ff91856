pub mod adb;
pub mod archive;
pub mod backend;
pub mod bus;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod devices;
pub mod error;
pub mod events;
pub mod gradle;
pub mod instrumentation;
pub mod store;
pub mod verdict;
pub mod worker;
