//! Type tags and type-erased value boxes.
//!
//! This module provides:
//! - [`TypeTag`]: a lightweight runtime type identifier used to assert value
//!   types across node boundaries without carrying generic parameters.
//! - [`AnyValue`]: a cheaply clonable, type-erased container for forwarded
//!   metadata and shared datastructures.
//!
//! Downcasts never panic and never use unwinding as control flow: a wrong
//! type surfaces as [`PipelineError::TypeMismatch`] at the call site.

use crate::error::PipelineError;
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

/// A lightweight runtime type tag for debugging and assertions.
///
/// `TypeTag` carries the `TypeId` and a readable type name. It travels with
/// every [`AnyValue`] so mismatches can be reported with both sides named.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeTag {
    /// Stable Rust type identifier.
    pub id: TypeId,
    /// Human-readable type name (best-effort).
    pub name: &'static str,
}

impl TypeTag {
    /// Construct a tag for `T`.
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }
}

/// A type-erased, shareable value.
///
/// Forwarded metadata and datastructure slots store `AnyValue`s. Cloning is
/// cheap (the payload sits behind an `Arc`), which is what lets the
/// propagation pass copy an entry along every outgoing item-flow edge without
/// requiring `Clone` of the payload type itself.
#[derive(Clone)]
pub struct AnyValue {
    payload: Arc<dyn Any + Send + Sync>,
    tag: TypeTag,
}

impl AnyValue {
    /// Box `value` with its type tag.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            payload: Arc::new(value),
            tag: TypeTag::of::<T>(),
        }
    }

    /// The tag of the stored value.
    #[must_use]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// True if the stored value is a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.tag.id == TypeId::of::<T>()
    }

    /// Borrow the stored value as `T`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::TypeMismatch`] if the stored value is not a `T`;
    /// `what` names the key or slot for the diagnostic.
    pub fn downcast_ref<T: Any>(&self, what: &str) -> Result<&T, PipelineError> {
        self.payload
            .downcast_ref::<T>()
            .ok_or_else(|| PipelineError::TypeMismatch {
                what: what.to_string(),
                requested: type_name::<T>(),
                stored: self.tag.name,
            })
    }

    /// Clone the stored value out as a `T`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::TypeMismatch`] if the stored value is not a `T`.
    pub fn extract<T: Any + Clone>(&self, what: &str) -> Result<T, PipelineError> {
        self.downcast_ref::<T>(what).cloned()
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyValue")
            .field("type", &self.tag.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_reports_both_types() {
        let v = AnyValue::new(7u64);
        assert!(v.is::<u64>());
        assert_eq!(v.extract::<u64>("n").unwrap(), 7);

        let err = v.extract::<String>("n").unwrap_err();
        match err {
            PipelineError::TypeMismatch {
                what,
                requested,
                stored,
            } => {
                assert_eq!(what, "n");
                assert!(requested.contains("String"));
                assert_eq!(stored, "u64");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
