//! The `Source` abstraction consumed by [`crate::component`]'s property
//! loaders. The core never parses YAML/JSON itself -- a `Loader`
//! supplied by the host produces `Source` values, and `Source` only needs to
//! expose enough structure for a `Property::loader` to pull a typed value
//! out. [`JsonSource`] is the one concrete implementation this crate ships,
//! sufficient to drive its own property-loading tests.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A document value the core can read component properties from.
///
/// Implementations are expected to be cheap to copy (a `Source` value
/// should stay around 512 bytes or less); nested document data should be
/// shared via reference counting rather than deep-copied, which is why
/// [`JsonSource`] wraps its value in an `Rc`.
pub trait Source: fmt::Debug {
    /// Whether this value represents "missing"/null.
    fn is_null(&self) -> bool;
    /// Whether this value is a scalar (number, string, bool).
    fn is_scalar(&self) -> bool;
    /// Whether this value is a sequence.
    fn is_sequence(&self) -> bool;
    /// Whether this value is a mapping.
    fn is_mapping(&self) -> bool;

    /// Read this value as an `f64`, if it is a numeric scalar.
    fn as_f64(&self) -> Option<f64>;
    /// Read this value as a `bool`, if it is a boolean scalar.
    fn as_bool(&self) -> Option<bool>;
    /// Read this value as a string slice, if it is a string scalar.
    fn as_str(&self) -> Option<&str>;

    /// Fetch the `index`th element of a sequence value.
    fn get_sequence_value(&self, index: usize) -> Option<Box<dyn Source>>;
    /// Fetch the value of `key` in a mapping value.
    fn get_mapping_value(&self, key: &str) -> Option<Box<dyn Source>>;

    /// Accumulated human-readable error messages for this document, if the
    /// host's loader recorded any while producing it.
    fn error_log(&self) -> String;
}

/// Something that turns a name (e.g. an asset path) into a [`Source`].
///
/// The concrete file format (YAML/JSON/...) and its parser are entirely a
/// host concern; the core only depends on this trait.
pub trait Loader {
    /// The concrete `Source` type this loader produces.
    type Output: Source;

    /// Load the document named `name`. If `log_errors` is set, parse errors
    /// are recorded into the returned source's [`Source::error_log`].
    fn load_source(&self, name: &str, log_errors: bool) -> Self::Output;
}

/// A `serde_json::Value`-backed [`Source`].
///
/// Cloning is cheap: the underlying value is held behind an `Rc` and shared
/// rather than deep-copied.
#[derive(Clone)]
pub struct JsonSource {
    value: Rc<serde_json::Value>,
    errors: Rc<RefCell<Vec<String>>>,
}

impl JsonSource {
    /// Wrap a JSON value as a `Source`.
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value: Rc::new(value),
            errors: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// The null source, used when a mapping key or sequence index is absent.
    pub fn null() -> Self {
        Self::new(serde_json::Value::Null)
    }

    /// Record an error message against this document (and any source cloned
    /// from it, since the error log is shared).
    pub fn log_error(&self, message: impl Into<String>) {
        self.errors.borrow_mut().push(message.into());
    }

    fn child(&self, value: serde_json::Value) -> Self {
        Self {
            value: Rc::new(value),
            errors: Rc::clone(&self.errors),
        }
    }
}

impl fmt::Debug for JsonSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonSource({})", self.value)
    }
}

impl Source for JsonSource {
    fn is_null(&self) -> bool {
        self.value.is_null()
    }

    fn is_scalar(&self) -> bool {
        matches!(
            &*self.value,
            serde_json::Value::Bool(_) | serde_json::Value::Number(_) | serde_json::Value::String(_)
        )
    }

    fn is_sequence(&self) -> bool {
        self.value.is_array()
    }

    fn is_mapping(&self) -> bool {
        self.value.is_object()
    }

    fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }

    fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    fn get_sequence_value(&self, index: usize) -> Option<Box<dyn Source>> {
        self.value
            .as_array()
            .and_then(|seq| seq.get(index))
            .map(|v| Box::new(self.child(v.clone())) as Box<dyn Source>)
    }

    fn get_mapping_value(&self, key: &str) -> Option<Box<dyn Source>> {
        self.value
            .as_object()
            .and_then(|map| map.get(key))
            .map(|v| Box::new(self.child(v.clone())) as Box<dyn Source>)
    }

    fn error_log(&self) -> String {
        self.errors.borrow().join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_reads() {
        let src = JsonSource::new(serde_json::json!(3.5));
        assert!(src.is_scalar());
        assert_eq!(src.as_f64(), Some(3.5));
    }

    #[test]
    fn mapping_navigation() {
        let src = JsonSource::new(serde_json::json!({"x": 1.0, "y": 2.0}));
        assert!(src.is_mapping());
        let x = src.get_mapping_value("x").unwrap();
        assert_eq!(x.as_f64(), Some(1.0));
        assert!(src.get_mapping_value("missing").is_none());
    }

    #[test]
    fn sequence_navigation() {
        let src = JsonSource::new(serde_json::json!([1, 2, 3]));
        assert!(src.is_sequence());
        assert_eq!(src.get_sequence_value(1).unwrap().as_f64(), Some(2.0));
        assert!(src.get_sequence_value(10).is_none());
    }

    #[test]
    fn error_log_shared_across_clones() {
        let src = JsonSource::new(serde_json::json!({}));
        let clone = src.clone();
        clone.log_error("boom");
        assert_eq!(src.error_log(), "boom");
    }
}
