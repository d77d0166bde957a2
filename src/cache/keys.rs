//! Query key definitions.
//!
//! A `QueryKey` is an ordered, immutable tuple of primitive parts. Equality and
//! hashing are structural, so two keys built from the same parts address the
//! same cache entry no matter where they were constructed.

use std::fmt;
use std::sync::Arc;

/// One primitive component of a [`QueryKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPart {
    Str(Arc<str>),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Str(value) => write!(f, "{value:?}"),
            KeyPart::Int(value) => write!(f, "{value}"),
            KeyPart::Bool(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        KeyPart::Str(Arc::from(value))
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        KeyPart::Str(Arc::from(value))
    }
}

impl From<&String> for KeyPart {
    fn from(value: &String) -> Self {
        KeyPart::Str(Arc::from(value.as_str()))
    }
}

impl From<bool> for KeyPart {
    fn from(value: bool) -> Self {
        KeyPart::Bool(value)
    }
}

macro_rules! int_key_part {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for KeyPart {
                fn from(value: $ty) -> Self {
                    KeyPart::Int(i64::from(value))
                }
            }
        )*
    };
}

int_key_part!(i8, i16, i32, i64, u8, u16, u32);

/// Identifies a cacheable resource, e.g. `["chat", "42"]`.
///
/// Cloning is cheap: the parts are shared behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Arc<[KeyPart]>);

impl QueryKey {
    /// Build a key from any sequence of parts.
    pub fn new<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<KeyPart>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if `prefix` matches the leading parts of this key.
    ///
    /// An empty prefix matches every key.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Extend this key with one more part, producing a new key.
    pub fn child(&self, part: impl Into<KeyPart>) -> Self {
        let mut parts = self.0.to_vec();
        parts.push(part.into());
        Self(parts.into())
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, part) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{part}")?;
        }
        f.write_str("]")
    }
}

/// Build a [`QueryKey`] from heterogeneous parts.
///
/// ```
/// use query_sync::query_key;
///
/// let key = query_key!["chat", 42];
/// assert_eq!(key.to_string(), r#"["chat",42]"#);
/// ```
#[macro_export]
macro_rules! query_key {
    ($($part:expr),* $(,)?) => {
        $crate::cache::QueryKey::from_parts(vec![$($crate::cache::KeyPart::from($part)),*])
    };
}

impl QueryKey {
    #[doc(hidden)]
    pub fn from_parts(parts: Vec<KeyPart>) -> Self {
        Self(parts.into())
    }
}
