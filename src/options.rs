#[cfg(feature = "serde")]
use serde::Deserialize;

/// What a resource shows while a new attempt is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize), serde(rename_all = "snake_case"))]
pub enum RefetchPolicy {
    /// Keep the previous `data` and `error` until the new result lands (stale-while-revalidate)
    #[default]
    RetainStale,
    /// Clear `data` and `error` as soon as a new attempt starts
    ClearOnRefetch,
}

/// Per-resource behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize), serde(default))]
pub struct ResourceOptions {
    pub refetch_policy: RefetchPolicy,
    /// Keep the last successful `data` when an attempt fails
    pub keep_data_on_error: bool,
    /// Abort the task of an attempt as soon as a newer one is dispatched.
    /// Superseded results are discarded either way.
    pub abort_superseded: bool,
}

impl Default for ResourceOptions {
    fn default() -> Self {
        ResourceOptions {
            refetch_policy: RefetchPolicy::RetainStale,
            keep_data_on_error: true,
            abort_superseded: false,
        }
    }
}

impl ResourceOptions {
    pub fn refetch_policy(mut self, policy: RefetchPolicy) -> Self {
        self.refetch_policy = policy;
        self
    }

    pub fn keep_data_on_error(mut self, keep: bool) -> Self {
        self.keep_data_on_error = keep;
        self
    }

    pub fn abort_superseded(mut self, abort: bool) -> Self {
        self.abort_superseded = abort;
        self
    }
}

/// Configuration handed to fetch providers by the application.
///
/// Passed explicitly (see [`crate::fetchers::fetcher::demo`]), never read from process-wide state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize), serde(default))]
pub struct FetchConfig {
    /// Serve fixture data instead of calling the real backend
    pub demo_mode: bool,
}
