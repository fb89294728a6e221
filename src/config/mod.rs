mod server;

pub use server::ServiceConfig;
