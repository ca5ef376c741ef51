//! # af-service
//!
//! Serves one or more tuner sessions to out-of-process trial workers over
//! newline-delimited JSON.

pub mod config;
pub mod protocol;
pub mod server;

pub use config::ServiceConfig;
pub use protocol::{ErrorBody, Request, Response, SessionRegistry};
pub use server::{handle_connection, serve};
