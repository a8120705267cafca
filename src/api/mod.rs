pub mod client;
pub mod models;

pub use client::{ByteStream, HttpClient, Transport, TransportError};
pub use models::ClientConfig;
