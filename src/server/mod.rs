mod config;
mod http_date;
mod http_layers;
mod server;
mod session;
mod state;

pub use config::ServerConfig;
pub use http_layers::RequestsLoggingLevel;
pub use server::run_server;
