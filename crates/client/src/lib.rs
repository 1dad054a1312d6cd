//! HTTP client for the delivery service.
//!
//! [`Client`] implements the service calls of the upload core and the
//! credential endpoints; [`HttpPartUploader`] sends part bodies to the
//! pre-signed storage destinations.

pub mod client;
pub mod uploader;

pub use client::{Client, Error};
pub use uploader::HttpPartUploader;
