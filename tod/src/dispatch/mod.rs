//! Dispatch layer
//!
//! One TCP listener serving two protocols: an HTTP/1.1 subset with bearer
//! auth and CORS, and a line-oriented `OP {json}` variant. Both map through
//! the same operation table and the same handlers.

mod http;
mod ops;
mod server;

pub use http::HttpRequest;
pub use ops::{Operation, error_response, ok_response};
pub use server::{DispatchServer, ServerState};
