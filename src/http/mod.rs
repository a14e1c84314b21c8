//! Request/response model and the network port.

mod client;
mod types;

pub use client::{HttpClient, Network};
pub use types::{CacheMode, Headers, Method, Request, RequestMode, Response};
