//! Type-erased stream elements.

use crate::errors::StreamError;
use std::any::{type_name, Any};
use std::fmt;

/// An owned, type-erased element travelling through a stage graph.
///
/// Stage graphs are heterogeneous (a `map` may turn integers into strings), so
/// the runtime carries elements as `Box<dyn Any + Send>` and typed builders
/// downcast at the edges. The element remembers the name of the type it was
/// created from so a failed downcast can say what it actually held.
pub struct Element {
    value: Box<dyn Any + Send>,
    type_name: &'static str,
}

impl Element {
    /// Wraps a value.
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// Returns the unit element, used as the result of sinks without a value.
    #[must_use]
    pub fn unit() -> Self {
        Self::new(())
    }

    /// Returns the name of the wrapped type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns true if the element holds a `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Borrows the value as a `T`.
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Borrows the value as a `T`, reporting a mismatch as a stream error.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::TypeMismatch`] if the element holds another type.
    pub fn try_downcast_ref<T: 'static>(&self) -> Result<&T, StreamError> {
        self.value
            .downcast_ref::<T>()
            .ok_or(StreamError::TypeMismatch {
                expected: type_name::<T>(),
                found: self.type_name,
            })
    }

    /// Takes the value out as a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::TypeMismatch`] if the element holds another type.
    pub fn downcast<T: 'static>(self) -> Result<T, StreamError> {
        let found = self.type_name;
        self.value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| StreamError::TypeMismatch {
                expected: type_name::<T>(),
                found,
            })
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_roundtrip() {
        let element = Element::new(42_i32);
        assert!(element.is::<i32>());
        assert_eq!(element.downcast_ref::<i32>(), Some(&42));
        assert_eq!(element.downcast::<i32>().unwrap(), 42);
    }

    #[test]
    fn test_downcast_mismatch_names_both_types() {
        let element = Element::new(String::from("x"));
        match element.downcast::<u8>() {
            Err(StreamError::TypeMismatch { expected, found }) => {
                assert_eq!(expected, "u8");
                assert_eq!(found, "alloc::string::String");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_unit() {
        assert!(Element::unit().is::<()>());
        assert_eq!(Element::unit().type_name(), "()");
    }
}
