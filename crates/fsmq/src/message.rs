//! Message and destination types, and the file-name mapping between them
//!
//! The wire format of this transport is the filesystem itself: a message is
//! one file named `{uuid}.{type_tag}` inside the destination directory. The
//! random id keeps concurrent producers from ever colliding; the extension
//! doubles as the subscription filter key.

use crate::error::TransportError;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// An opaque payload plus a type tag.
///
/// The transport never inspects `bytes`; serialization belongs to the hosting
/// engine. `type_tag` becomes the message file's extension, so it must be a
/// plain token (no dots, no path separators).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMessage {
    pub bytes: Vec<u8>,
    pub type_tag: String,
}

impl BinaryMessage {
    pub fn new(bytes: impl Into<Vec<u8>>, type_tag: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            type_tag: type_tag.into(),
        }
    }
}

/// Logical queue identifier: a directory path.
///
/// A jailed destination resolves to `{root}/{jail_tag}`, isolating one
/// transport's traffic from another's on the same nominal destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination(PathBuf);

impl Destination {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Physical directory for this destination under the given jail tag.
    pub(crate) fn resolve(&self, jail_tag: Option<&str>) -> PathBuf {
        match jail_tag {
            Some(tag) => self.0.join(tag),
            None => self.0.clone(),
        }
    }
}

impl From<PathBuf> for Destination {
    fn from(path: PathBuf) -> Self {
        Destination::new(path)
    }
}

impl From<&Path> for Destination {
    fn from(path: &Path) -> Self {
        Destination::new(path)
    }
}

impl From<&str> for Destination {
    fn from(path: &str) -> Self {
        Destination::new(path)
    }
}

/// Validate a type tag for use as a file extension.
pub(crate) fn check_type_tag(tag: &str) -> Result<(), TransportError> {
    let ok = !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(TransportError::InvalidTypeTag {
            tag: tag.to_string(),
        })
    }
}

/// Fresh unique file name for a message of the given type.
pub(crate) fn message_file_name(type_tag: &str) -> String {
    format!("{}.{}", Uuid::new_v4(), type_tag)
}

/// Type tag carried by a message file, i.e. its extension without the dot.
pub(crate) fn type_tag_of(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_without_jail_tag() {
        let dest = Destination::new("/queues/orders");
        assert_eq!(dest.resolve(None), PathBuf::from("/queues/orders"));
    }

    #[test]
    fn test_resolve_with_jail_tag() {
        let dest = Destination::new("/queues/orders");
        assert_eq!(
            dest.resolve(Some("session-1")),
            PathBuf::from("/queues/orders/session-1")
        );
    }

    #[test]
    fn test_message_file_names_are_unique() {
        let a = message_file_name("evt");
        let b = message_file_name("evt");
        assert_ne!(a, b);
        assert!(a.ends_with(".evt"));
        assert!(b.ends_with(".evt"));
    }

    #[test]
    fn test_type_tag_round_trip() {
        let name = message_file_name("order-created");
        let path = Path::new("/queues/orders").join(name);
        assert_eq!(type_tag_of(&path), "order-created");
    }

    #[test]
    fn test_type_tag_of_extensionless_path() {
        assert_eq!(type_tag_of(Path::new("/queues/orders/noext")), "");
    }

    #[test]
    fn test_check_type_tag_rejects_separators() {
        assert!(check_type_tag("evt").is_ok());
        assert!(check_type_tag("order_created-2").is_ok());
        assert!(check_type_tag("").is_err());
        assert!(check_type_tag("a.b").is_err());
        assert!(check_type_tag("a/b").is_err());
    }
}
