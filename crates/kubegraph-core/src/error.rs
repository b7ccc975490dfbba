//! Error types for object decoding.

use crate::key::ResourceKind;
use thiserror::Error;

/// Errors raised while turning a raw cluster object into an entity.
///
/// Only failures that make the object impossible to key are errors.
/// Anything else a rule might want (labels, selector, node name, ...)
/// decays to an absent value instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{kind} object is not a JSON object")]
    NotAnObject { kind: ResourceKind },

    #[error("{kind} object has no metadata.name")]
    MissingName { kind: ResourceKind },

    #[error("expected a {expected} object but it declares kind {found}")]
    KindMismatch {
        expected: ResourceKind,
        found: String,
    },
}

pub type Result<T> = std::result::Result<T, DecodeError>;
