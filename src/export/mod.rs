pub mod health;
pub mod server;

pub use health::IndexMetrics;
pub use server::HttpServer;
