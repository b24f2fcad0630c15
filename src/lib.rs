pub mod badge;
pub mod builder;
pub mod config;
pub mod errors;
pub mod hub;
pub mod logging;
pub mod proxy;
pub mod registry;
pub mod server;
pub mod store;
pub mod webhook;
