//! Reference JSON-over-HTTP transport for [`CollectionClient`](crate::CollectionClient).

mod client;
mod models;

pub use client::HttpCollectionClient;
