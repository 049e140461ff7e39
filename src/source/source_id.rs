//! Source identification type.

use std::sync::Arc;

/// Identifier of an incoming stream, such as an RTP SSRC or a participant name.
///
/// Cloning is an `Arc` pointer copy.
///
/// # Example
///
/// ```
/// use stream_mixer::SourceId;
///
/// let alice = SourceId::new("alice");
/// assert_ne!(alice, SourceId::new("bob"));
/// assert_eq!(alice, SourceId::from("alice"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(Arc<str>);

impl SourceId {
    /// Creates a new source ID from a string.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<u32> for SourceId {
    fn from(ssrc: u32) -> Self {
        Self::new(format!("{ssrc:#010x}"))
    }
}

impl AsRef<str> for SourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_equality() {
        let a = SourceId::new("alice");
        let b = SourceId::new("alice");
        let c = SourceId::new("bob");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_source_id_display() {
        let id = SourceId::new("alice");
        assert_eq!(format!("{id}"), "alice");
    }

    #[test]
    fn test_source_id_from_ssrc() {
        let id = SourceId::from(0x1234_abcd_u32);
        assert_eq!(id.as_str(), "0x1234abcd");
    }

    #[test]
    fn test_source_id_from_str() {
        let id: SourceId = "test".into();
        assert_eq!(id.as_str(), "test");
    }

    #[test]
    fn test_source_id_from_string() {
        let id: SourceId = String::from("test").into();
        assert_eq!(id.as_str(), "test");
    }

    #[test]
    fn test_source_id_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(SourceId::new("alice"));
        set.insert(SourceId::new("bob"));
        set.insert(SourceId::new("alice")); // duplicate

        assert_eq!(set.len(), 2);
    }
}
