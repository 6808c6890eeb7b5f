mod server;

pub use server::{AppConfig, DatabaseUrl, ServerConfig};
