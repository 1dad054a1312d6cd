//! Wire types for the delivery service REST API.
//!
//! Request and response bodies are JSON, except the storage backend's
//! multipart-initiation response, which is XML (see [`xml`]).

pub mod constants;
pub mod messages;
pub mod types;
pub mod xml;
