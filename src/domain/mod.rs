//! Domain layer - Cache keys, store contract and errors

pub mod cache;
pub mod error;

pub use error::DomainError;
