pub mod api;
pub mod backup;
pub mod config;
pub mod naming;
pub mod retention;
pub mod utils;
pub mod waiter;
