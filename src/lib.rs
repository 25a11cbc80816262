/// Chat server library: persistent chat store, live WebSocket gateway and REST surface.
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod server;

pub use error::{ChatError, Result};
