pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod layout;
pub mod progress;
pub mod report;
pub mod sync;
pub mod titledb;
pub mod tmd;
pub mod verify;
