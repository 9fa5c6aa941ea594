#![cfg_attr(docsrs, feature(doc_auto_cfg))]
//! Asynchronous resources that follow their dependency values.
//!
//! An [`AsyncResource`](resource::AsyncResource) runs a [`Fetcher`](fetchers::fetcher::Fetcher)
//! whenever its dependencies change or a refetch is requested, and shows `data`, `loading` and
//! `error` for the most recently dispatched attempt only. Attempts that were superseded while in
//! flight are discarded, whatever order they finish in.

/// Async resource instance and its state types
pub mod resource;
/// Fetch providers for resources.
/// Public traits are included to allow easy use of custom implementations.
pub mod fetchers;
/// Resource and fetcher configuration
pub mod options;
/// Error type carried in resource state
pub mod error;
/// Topic-based event hub used to trigger refetches
pub mod realtime;
