//! HTTP access for fetching installer scripts.

mod client;

pub use client::HttpClient;
