pub mod config;
pub mod http;
pub mod whitelist_loader;
