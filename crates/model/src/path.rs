//! Path types: normalized entry paths and canonical mount points.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::StructuralError;

/// Normalized relative path of an entry within one archive.
///
/// The root entry's path is the empty string. A legal entry path:
/// - is relative (no leading separator),
/// - uses `/` separators only,
/// - contains no empty, `.` or `..` segments,
/// - has no trailing separator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryPath(String);

impl EntryPath {
    /// The root path (empty string).
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse and validate a path in normal form.
    ///
    /// # Arguments
    /// * `path` - Candidate path string; the empty string denotes the root
    ///
    /// # Returns
    /// The validated path, or `InvalidPath` if not in legal normal form.
    pub fn new(path: &str) -> Result<Self, StructuralError> {
        if path.is_empty() {
            return Ok(Self::root());
        }
        if path.contains('\\') {
            return Err(StructuralError::invalid_path(path, "backslash separator"));
        }
        if path.starts_with('/') {
            return Err(StructuralError::invalid_path(path, "absolute path"));
        }
        if path.ends_with('/') {
            return Err(StructuralError::invalid_path(path, "trailing separator"));
        }
        for segment in path.split('/') {
            match segment {
                "" => return Err(StructuralError::invalid_path(path, "empty segment")),
                "." | ".." => {
                    return Err(StructuralError::invalid_path(path, "dot segment"));
                }
                _ => {}
            }
        }
        Ok(Self(path.to_string()))
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into parent path and base name.
    ///
    /// # Returns
    /// `(parent, base)` pair, or `None` for the root path.
    pub fn parent_and_base(&self) -> Option<(EntryPath, &str)> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(pos) => Some((Self(self.0[..pos].to_string()), &self.0[pos + 1..])),
            None => Some((Self::root(), &self.0)),
        }
    }

    /// Concatenate another normalized path onto this one.
    ///
    /// Both sides are already validated, so the result is normal by
    /// construction.
    pub fn concat(&self, rel: &EntryPath) -> EntryPath {
        if rel.is_root() {
            self.clone()
        } else if self.is_root() {
            rel.clone()
        } else {
            Self(format!("{}/{}", self.0, rel.0))
        }
    }

    /// Append a validated base name to this path.
    ///
    /// # Arguments
    /// * `base` - Single segment to append (no separators)
    pub fn join(&self, base: &str) -> Result<EntryPath, StructuralError> {
        if base.is_empty() || base.contains('/') || base == "." || base == ".." {
            return Err(StructuralError::invalid_path(base, "illegal segment"));
        }
        if self.is_root() {
            Ok(Self(base.to_string()))
        } else {
            Ok(Self(format!("{}/{}", self.0, base)))
        }
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical identity of one archive's virtual root.
///
/// A mount point URI is absolute, normalized, and ends with a `/`. A mount
/// point is either *rooted* directly in the host file system, or *nested*
/// inside an enclosing archive, in which case it records the enclosing mount
/// point and the entry path of the archive file within it.
///
/// Identity (`Eq`, `Hash`, `Ord`) is the URI string alone; descending
/// lexicographic order places a nested mount point before its enclosing one.
#[derive(Debug, Clone)]
pub struct MountPoint {
    uri: String,
    nesting: Option<Nesting>,
}

/// Link from a nested mount point to its enclosing archive.
#[derive(Debug, Clone)]
pub struct Nesting {
    /// Mount point of the enclosing archive.
    pub parent: Arc<MountPoint>,
    /// Path of the archive file within the enclosing archive.
    pub entry: EntryPath,
}

impl MountPoint {
    /// Create a mount point rooted in the host file system.
    ///
    /// # Arguments
    /// * `uri` - Absolute identity of the archive file; a trailing `/` is
    ///   appended if missing
    pub fn rooted(uri: &str) -> Result<Self, StructuralError> {
        if uri.is_empty() {
            return Err(StructuralError::invalid_path(uri, "empty mount point"));
        }
        if uri.contains('\\') {
            return Err(StructuralError::invalid_path(uri, "backslash separator"));
        }
        if uri.split('/').any(|s| s == "." || s == "..") {
            return Err(StructuralError::invalid_path(uri, "dot segment"));
        }
        let mut uri: String = uri.to_string();
        if !uri.ends_with('/') {
            uri.push('/');
        }
        Ok(Self { uri, nesting: None })
    }

    /// Create a mount point nested inside an enclosing archive.
    ///
    /// # Arguments
    /// * `parent` - Mount point of the enclosing archive
    /// * `entry` - Path of the archive file within the enclosing archive
    pub fn nested(parent: &MountPoint, entry: EntryPath) -> Result<Self, StructuralError> {
        if entry.is_root() {
            return Err(StructuralError::invalid_path("", "nested at root entry"));
        }
        let uri: String = format!("{}{}/", parent.uri, entry.as_str());
        Ok(Self {
            uri,
            nesting: Some(Nesting {
                parent: Arc::new(parent.clone()),
                entry,
            }),
        })
    }

    /// The canonical URI, including the trailing separator.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The nesting link, or `None` for a host-rooted mount point.
    pub fn nesting(&self) -> Option<&Nesting> {
        self.nesting.as_ref()
    }

    /// Whether this mount point is rooted directly in the host file system.
    pub fn is_rooted(&self) -> bool {
        self.nesting.is_none()
    }
}

impl PartialEq for MountPoint {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri
    }
}

impl Eq for MountPoint {}

impl Hash for MountPoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
    }
}

impl PartialOrd for MountPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MountPoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uri.cmp(&other.uri)
    }
}

impl fmt::Display for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_path_is_empty() {
        let root: EntryPath = EntryPath::root();
        assert!(root.is_root());
        assert_eq!(root.as_str(), "");
        assert!(root.parent_and_base().is_none());
    }

    #[test]
    fn test_new_accepts_normal_form() {
        assert!(EntryPath::new("a").is_ok());
        assert!(EntryPath::new("a/b/c.txt").is_ok());
        assert!(EntryPath::new("").is_ok());
    }

    #[test]
    fn test_new_rejects_illegal_forms() {
        assert!(EntryPath::new("/a").is_err());
        assert!(EntryPath::new("a/").is_err());
        assert!(EntryPath::new("a//b").is_err());
        assert!(EntryPath::new("a/../b").is_err());
        assert!(EntryPath::new("./a").is_err());
        assert!(EntryPath::new("a\\b").is_err());
    }

    #[test]
    fn test_parent_and_base() {
        let path: EntryPath = EntryPath::new("a/b/c").unwrap();
        let (parent, base) = path.parent_and_base().unwrap();
        assert_eq!(parent.as_str(), "a/b");
        assert_eq!(base, "c");

        let top: EntryPath = EntryPath::new("a").unwrap();
        let (parent, base) = top.parent_and_base().unwrap();
        assert!(parent.is_root());
        assert_eq!(base, "a");
    }

    #[test]
    fn test_concat() {
        let a: EntryPath = EntryPath::new("a/b").unwrap();
        let c: EntryPath = EntryPath::new("c/d").unwrap();
        assert_eq!(a.concat(&c).as_str(), "a/b/c/d");
        assert_eq!(a.concat(&EntryPath::root()).as_str(), "a/b");
        assert_eq!(EntryPath::root().concat(&c).as_str(), "c/d");
    }

    #[test]
    fn test_join() {
        let root: EntryPath = EntryPath::root();
        assert_eq!(root.join("a").unwrap().as_str(), "a");
        assert_eq!(
            root.join("a").unwrap().join("b").unwrap().as_str(),
            "a/b"
        );
        assert!(root.join("a/b").is_err());
        assert!(root.join("..").is_err());
    }

    #[test]
    fn test_rooted_mount_point_normalizes_trailing_separator() {
        let mp: MountPoint = MountPoint::rooted("file:/tmp/outer.zip").unwrap();
        assert_eq!(mp.uri(), "file:/tmp/outer.zip/");
        assert!(mp.is_rooted());
    }

    #[test]
    fn test_nested_mount_point_extends_parent_uri() {
        let outer: MountPoint = MountPoint::rooted("file:/tmp/outer.zip").unwrap();
        let inner: MountPoint =
            MountPoint::nested(&outer, EntryPath::new("inner.zip").unwrap()).unwrap();
        assert_eq!(inner.uri(), "file:/tmp/outer.zip/inner.zip/");
        let nesting: &Nesting = inner.nesting().unwrap();
        assert_eq!(nesting.parent.uri(), outer.uri());
        assert_eq!(nesting.entry.as_str(), "inner.zip");
    }

    #[test]
    fn test_nested_sorts_after_parent_ascending() {
        let outer: MountPoint = MountPoint::rooted("file:/tmp/outer.zip").unwrap();
        let inner: MountPoint =
            MountPoint::nested(&outer, EntryPath::new("inner.zip").unwrap()).unwrap();
        // Descending order puts the nested archive first.
        assert!(inner > outer);
    }
}
