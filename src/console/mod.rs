//! Operator surface over HTTP

pub mod http;

pub use http::{routes, serve};
