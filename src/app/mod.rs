// Application layer: HTTP surface wiring the forwarder, search and demo services.

pub mod demo;
pub mod search;
pub mod server;

pub use server::{router, serve, AppState};
