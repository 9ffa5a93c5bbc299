pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod plugin;
pub mod protocol;
pub mod state;
pub mod transport;
pub mod types;

#[doc(hidden)]
pub mod test_utils;
