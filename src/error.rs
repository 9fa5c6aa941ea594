use std::any::Any;
use std::error::Error;
use std::sync::Arc;
use thiserror::Error;

/// Outcome of one fetch attempt. `Ok` carries the data, `Err` the failure.
pub type FetchResult<T> = Result<T, FetchError>;

/// Failure carried inside a resource's `error` field.
///
/// The resource never classifies failures further. Whatever the fetch operation reports
/// is stored as-is, so callers can downcast [`FetchError::Operation`] to their own type.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Error reported by the fetch operation itself
    #[error("{0}")]
    Operation(Arc<dyn Error + Send + Sync>),
    /// The fetch operation panicked. Holds the panic message.
    #[error("{0}")]
    Panicked(String),
    /// Plain message, for operations without a concrete error type
    #[error("{0}")]
    Message(String),
}

impl FetchError {
    pub fn new(err: impl Error + Send + Sync + 'static) -> Self {
        FetchError::Operation(Arc::new(err))
    }

    pub fn msg(message: impl Into<String>) -> Self {
        FetchError::Message(message.into())
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, FetchError::Panicked(_))
    }

    /// Try to view the operation error as a concrete type.
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        match self {
            FetchError::Operation(inner) => inner.downcast_ref(),
            _ => None,
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "fetch operation panicked".to_string()
        };
        FetchError::Panicked(message)
    }
}
