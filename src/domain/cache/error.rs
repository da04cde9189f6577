//! Errors surfaced by cached loads

use thiserror::Error;

use crate::domain::DomainError;

/// Failure of a cached load
///
/// Only two things reach the caller: a key that could not be derived, and
/// the loader's own error, passed through untouched. Store failures are
/// absorbed before this point.
#[derive(Debug, Error)]
pub enum LoadError<E> {
    #[error("Failed to derive cache key: {0}")]
    Encoding(#[source] DomainError),

    #[error(transparent)]
    Loader(E),
}

impl<E> LoadError<E> {
    /// Returns the loader error, if that is what failed
    pub fn into_loader(self) -> Option<E> {
        match self {
            LoadError::Loader(e) => Some(e),
            LoadError::Encoding(_) => None,
        }
    }

    pub fn is_encoding(&self) -> bool {
        matches!(self, LoadError::Encoding(_))
    }
}

impl<E: From<DomainError>> LoadError<E> {
    /// Collapses both cases into the loader's error type
    pub fn flatten(self) -> E {
        match self {
            LoadError::Encoding(e) => E::from(e),
            LoadError::Loader(e) => e,
        }
    }
}
