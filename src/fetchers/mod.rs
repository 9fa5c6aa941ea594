/// Fetcher trait and the generic adapters built on it
pub mod fetcher;

/// Fetcher and extractors that use reqwest HTTP client to load data from a REST endpoint
#[cfg(feature = "http")]
pub mod http;
