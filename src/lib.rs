pub mod config;
pub mod event;
pub mod monitoring;
pub mod notify;
pub mod shutdown;
pub mod utils;
