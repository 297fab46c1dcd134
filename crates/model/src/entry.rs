//! Archive entry types.

use std::time::SystemTime;

use crate::path::EntryPath;

/// Type of an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Regular file entry.
    File,
    /// Directory entry.
    Directory,
}

/// Modification time of an entry.
///
/// `Unknown` is a real sentinel: ghost directories carry it, and implicit
/// child insertions never update an `Unknown` parent time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mtime {
    /// Known modification time.
    Known(SystemTime),
    /// Unknown modification time.
    Unknown,
}

impl Mtime {
    /// The current time as a known mtime.
    pub fn now() -> Self {
        Self::Known(SystemTime::now())
    }

    /// Whether the time is known.
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    /// The known time, if any.
    pub fn time(&self) -> Option<SystemTime> {
        match self {
            Self::Known(t) => Some(*t),
            Self::Unknown => None,
        }
    }
}

/// Insertion-ordered, duplicate-free set of child base names.
#[derive(Debug, Clone, Default)]
pub struct NameSet {
    names: Vec<String>,
}

impl NameSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a name, preserving insertion order.
    ///
    /// # Returns
    /// `true` if the name was not already present.
    pub fn insert(&mut self, name: &str) -> bool {
        if self.contains(name) {
            false
        } else {
            self.names.push(name.to_string());
            true
        }
    }

    /// Remove a name.
    ///
    /// # Returns
    /// `true` if the name was present.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.names.iter().position(|n| n == name) {
            Some(pos) => {
                self.names.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Whether the name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Iterate names in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Number of names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One entry of an archive's in-memory file system.
#[derive(Debug, Clone)]
pub struct Entry {
    path: EntryPath,
    kind: EntryType,
    size: u64,
    mtime: Mtime,
    children: Option<NameSet>,
}

impl Entry {
    /// Create a new entry.
    ///
    /// Directories start with an empty child set.
    ///
    /// # Arguments
    /// * `path` - Normalized path within the archive
    /// * `kind` - File or directory
    /// * `mtime` - Modification time, `Unknown` for ghosts
    pub fn new(path: EntryPath, kind: EntryType, mtime: Mtime) -> Self {
        let children: Option<NameSet> = match kind {
            EntryType::Directory => Some(NameSet::new()),
            EntryType::File => None,
        };
        Self {
            path,
            kind,
            size: 0,
            mtime,
            children,
        }
    }

    /// Set the size during construction.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// The entry path.
    pub fn path(&self) -> &EntryPath {
        &self.path
    }

    /// The entry type.
    pub fn kind(&self) -> EntryType {
        self.kind
    }

    /// Whether this is a directory entry.
    pub fn is_directory(&self) -> bool {
        self.kind == EntryType::Directory
    }

    /// Whether this is a file entry.
    pub fn is_file(&self) -> bool {
        self.kind == EntryType::File
    }

    /// Size in bytes (0 for directories).
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Update the size.
    pub fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    /// The modification time.
    pub fn mtime(&self) -> Mtime {
        self.mtime
    }

    /// Update the modification time.
    pub fn set_mtime(&mut self, mtime: Mtime) {
        self.mtime = mtime;
    }

    /// Whether this is a ghost directory.
    ///
    /// Ghosts are directories synthesized as missing parents during a
    /// container scan; they carry an `Unknown` mtime and are skipped when the
    /// archive is written out.
    pub fn is_ghost(&self) -> bool {
        self.is_directory() && !self.mtime.is_known()
    }

    /// Child name set of a directory.
    pub fn children(&self) -> Option<&NameSet> {
        self.children.as_ref()
    }

    /// Mutable child name set of a directory.
    pub fn children_mut(&mut self) -> Option<&mut NameSet> {
        self.children.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_set_insertion_order_no_duplicates() {
        let mut set: NameSet = NameSet::new();
        assert!(set.insert("b"));
        assert!(set.insert("a"));
        assert!(!set.insert("b"));
        let names: Vec<&str> = set.iter().collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(set.remove("b"));
        assert!(!set.remove("b"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_directory_has_child_set() {
        let dir: Entry = Entry::new(EntryPath::root(), EntryType::Directory, Mtime::now());
        assert!(dir.children().is_some());
        let file: Entry = Entry::new(
            EntryPath::new("f").unwrap(),
            EntryType::File,
            Mtime::now(),
        );
        assert!(file.children().is_none());
    }

    #[test]
    fn test_ghost_is_unknown_time_directory() {
        let ghost: Entry = Entry::new(
            EntryPath::new("g").unwrap(),
            EntryType::Directory,
            Mtime::Unknown,
        );
        assert!(ghost.is_ghost());
        let real: Entry = Entry::new(
            EntryPath::new("d").unwrap(),
            EntryType::Directory,
            Mtime::now(),
        );
        assert!(!real.is_ghost());
        let file: Entry = Entry::new(
            EntryPath::new("f").unwrap(),
            EntryType::File,
            Mtime::Unknown,
        );
        assert!(!file.is_ghost());
    }
}
