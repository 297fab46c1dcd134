//! In-memory archive file system: the entry tree.
//!
//! One `EntryTree` represents the contents of one mounted archive. The tree
//! keeps no concurrency control of its own; every mutation happens under the
//! write lock of the owning archive model.
//!
//! # Link transactions
//!
//! `link` is a two-phase operation: a *plan* phase that validates and builds
//! the chain of entries to insert without mutating anything, and a *commit*
//! phase that applies the whole chain and bumps the touch counter exactly
//! once. A failed plan therefore never leaves the tree half-modified.

use std::collections::HashMap;

use tracing::warn;

use crate::entry::{Entry, EntryType, Mtime, NameSet};
use crate::error::StructuralError;
use crate::path::EntryPath;

/// In-memory file system of one archive.
#[derive(Debug)]
pub struct EntryTree {
    /// Path to entry mapping; always contains the root directory.
    entries: HashMap<EntryPath, Entry>,
    /// Monotonically increasing change counter; zero means the tree matches
    /// the last-synchronized state.
    touch_count: u64,
    /// Whether mutations are rejected.
    read_only: bool,
}

/// One element of a planned link chain: the entry to insert and where.
#[derive(Debug)]
struct PlannedLink {
    parent: EntryPath,
    base: String,
    entry: Entry,
}

impl EntryTree {
    /// Create an empty tree for a newly created archive.
    ///
    /// The root directory carries the current time so that it exists
    /// explicitly rather than as a ghost.
    pub fn new() -> Self {
        let mut entries: HashMap<EntryPath, Entry> = HashMap::new();
        entries.insert(
            EntryPath::root(),
            Entry::new(EntryPath::root(), EntryType::Directory, Mtime::now()),
        );
        Self {
            entries,
            touch_count: 0,
            read_only: false,
        }
    }

    /// Build a tree from the entries enumerated by an input container scan.
    ///
    /// Orphaned entries are repaired by synthesizing missing parent
    /// directories as ghosts (`Unknown` mtime). A parent path occupied by a
    /// file entry is replaced by a ghost directory; archives in the wild do
    /// contain such conflicts and a scan must not fail on them.
    ///
    /// # Arguments
    /// * `scanned` - Entries in container order
    /// * `read_only` - Whether the tree should reject mutations
    pub fn from_scan(scanned: Vec<Entry>, read_only: bool) -> Self {
        let mut entries: HashMap<EntryPath, Entry> = HashMap::new();
        // The scanned root, if any, replaces this ghost below.
        entries.insert(
            EntryPath::root(),
            Entry::new(EntryPath::root(), EntryType::Directory, Mtime::Unknown),
        );

        for entry in scanned {
            let path: EntryPath = entry.path().clone();
            if path.is_root() {
                // Keep any child names already recorded for the root.
                let children: Option<NameSet> = entries
                    .get(&path)
                    .and_then(|e| e.children().cloned());
                let mut root: Entry =
                    Entry::new(path.clone(), EntryType::Directory, entry.mtime());
                if let (Some(set), Some(slot)) = (children, root.children_mut()) {
                    *slot = set;
                }
                entries.insert(path, root);
                continue;
            }

            Self::insert_scanned(&mut entries, entry);
        }

        Self {
            entries,
            touch_count: 0,
            read_only,
        }
    }

    /// Insert one scanned entry, synthesizing ghost parents as needed.
    fn insert_scanned(entries: &mut HashMap<EntryPath, Entry>, entry: Entry) {
        let path: EntryPath = entry.path().clone();

        // Merge a duplicate directory entry instead of dropping its children.
        let entry: Entry = match (entries.get(&path), entry) {
            (Some(existing), new) if existing.is_directory() && new.is_directory() => {
                let mut merged: Entry = new;
                if let (Some(old), Some(slot)) =
                    (existing.children(), merged.children_mut())
                {
                    *slot = old.clone();
                }
                merged
            }
            (_, new) => new,
        };
        entries.insert(path.clone(), entry);

        // Walk up, creating ghost directories until an existing one is found.
        let mut child: EntryPath = path;
        loop {
            let (parent, base) = match child.parent_and_base() {
                Some((p, b)) => (p, b.to_string()),
                None => break,
            };
            match entries.get_mut(&parent) {
                Some(existing) if existing.is_directory() => {
                    if let Some(children) = existing.children_mut() {
                        children.insert(&base);
                    }
                    break;
                }
                Some(existing) => {
                    warn!(
                        path = %parent,
                        "file entry shadows a parent directory; replacing with ghost"
                    );
                    debug_assert!(existing.is_file());
                    let mut ghost: Entry =
                        Entry::new(parent.clone(), EntryType::Directory, Mtime::Unknown);
                    if let Some(children) = ghost.children_mut() {
                        children.insert(&base);
                    }
                    entries.insert(parent.clone(), ghost);
                    child = parent;
                }
                None => {
                    let mut ghost: Entry =
                        Entry::new(parent.clone(), EntryType::Directory, Mtime::Unknown);
                    if let Some(children) = ghost.children_mut() {
                        children.insert(&base);
                    }
                    entries.insert(parent.clone(), ghost);
                    child = parent;
                }
            }
        }
    }

    /// Whether the tree rejects mutations.
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// The change counter; zero means unchanged since last sync.
    pub fn touch_count(&self) -> u64 {
        self.touch_count
    }

    /// Whether the tree differs from its last-synchronized state.
    pub fn is_touched(&self) -> bool {
        self.touch_count > 0
    }

    /// Number of entries, including the root.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether only the root exists.
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Look up an entry.
    pub fn get(&self, path: &EntryPath) -> Option<&Entry> {
        self.entries.get(path)
    }

    /// List the child names of a directory in insertion order.
    ///
    /// # Arguments
    /// * `path` - Directory path
    ///
    /// # Returns
    /// Child base names, or `NotFound`/`NotADirectory`.
    pub fn list(&self, path: &EntryPath) -> Result<Vec<String>, StructuralError> {
        let entry: &Entry = self
            .entries
            .get(path)
            .ok_or_else(|| StructuralError::not_found(path.as_str()))?;
        let children: &NameSet = entry.children().ok_or_else(|| {
            StructuralError::NotADirectory {
                path: path.as_str().to_string(),
            }
        })?;
        Ok(children.iter().map(str::to_string).collect())
    }

    /// Set the modification time of an entry.
    ///
    /// Bumps the touch counter.
    pub fn set_mtime(
        &mut self,
        path: &EntryPath,
        mtime: Mtime,
    ) -> Result<(), StructuralError> {
        if self.read_only {
            return Err(StructuralError::ReadOnly);
        }
        let entry: &mut Entry = self
            .entries
            .get_mut(path)
            .ok_or_else(|| StructuralError::not_found(path.as_str()))?;
        entry.set_mtime(mtime);
        self.touch_count += 1;
        Ok(())
    }

    /// Link a new entry into the tree.
    ///
    /// # Arguments
    /// * `path` - Target path in normal form
    /// * `kind` - File or directory
    /// * `create_parents` - Whether to create missing parent directories
    /// * `template` - Optional entry supplying size and mtime for the leaf
    ///
    /// # Errors
    /// * `ReadOnly`, `IsRoot`, `InvalidPath` - illegal request
    /// * `EntryExists` - a directory link over any entry, or a file link over
    ///   a directory
    /// * `NotADirectory` - a parent path resolves to a file
    /// * `MissingParent` - parent missing and `create_parents` not set
    pub fn link(
        &mut self,
        path: &EntryPath,
        kind: EntryType,
        create_parents: bool,
        template: Option<&Entry>,
    ) -> Result<(), StructuralError> {
        let chain: Vec<PlannedLink> = self.plan_link(path, kind, create_parents, template)?;
        self.commit_link(chain);
        Ok(())
    }

    /// Phase one: validate and build the insertion chain without mutating.
    fn plan_link(
        &self,
        path: &EntryPath,
        kind: EntryType,
        create_parents: bool,
        template: Option<&Entry>,
    ) -> Result<Vec<PlannedLink>, StructuralError> {
        if self.read_only {
            return Err(StructuralError::ReadOnly);
        }
        if path.is_root() {
            return Err(StructuralError::IsRoot);
        }

        if let Some(existing) = self.entries.get(path) {
            // A directory link never replaces anything; a file link may only
            // replace another file.
            if kind == EntryType::Directory || existing.is_directory() {
                return Err(StructuralError::EntryExists {
                    path: path.as_str().to_string(),
                });
            }
        }

        let leaf_mtime: Mtime = match template {
            Some(t) if t.mtime().is_known() => t.mtime(),
            _ => Mtime::now(),
        };
        let leaf_size: u64 = template.map(Entry::size).unwrap_or(0);
        let (parent, base) = path
            .parent_and_base()
            .ok_or(StructuralError::IsRoot)?;

        let leaf: PlannedLink = PlannedLink {
            parent: parent.clone(),
            base: base.to_string(),
            entry: Entry::new(path.clone(), kind, leaf_mtime).with_size(leaf_size),
        };

        match self.entries.get(&parent) {
            Some(existing) if existing.is_directory() => Ok(vec![leaf]),
            Some(_) => Err(StructuralError::NotADirectory {
                path: parent.as_str().to_string(),
            }),
            None if !create_parents => Err(StructuralError::MissingParent {
                path: path.as_str().to_string(),
            }),
            None => {
                // Plan the missing ancestor chain, nearest existing ancestor
                // first. Created parents are real directories with a current
                // time, not ghosts.
                let mut chain: Vec<PlannedLink> = vec![leaf];
                let mut current: EntryPath = parent;
                loop {
                    let (ancestor, base) = match current.parent_and_base() {
                        Some((p, b)) => (p, b.to_string()),
                        None => break,
                    };
                    chain.push(PlannedLink {
                        parent: ancestor.clone(),
                        base,
                        entry: Entry::new(current.clone(), EntryType::Directory, Mtime::now()),
                    });
                    match self.entries.get(&ancestor) {
                        Some(existing) if existing.is_directory() => break,
                        Some(_) => {
                            return Err(StructuralError::NotADirectory {
                                path: ancestor.as_str().to_string(),
                            })
                        }
                        None => current = ancestor,
                    }
                }
                chain.reverse();
                Ok(chain)
            }
        }
    }

    /// Phase two: apply the chain and bump the touch counter once.
    fn commit_link(&mut self, chain: Vec<PlannedLink>) {
        self.touch_count += 1;
        for planned in chain {
            if let Some(parent) = self.entries.get_mut(&planned.parent) {
                let ghost: bool = parent.is_ghost();
                if let Some(children) = parent.children_mut() {
                    children.insert(&planned.base);
                }
                if !ghost {
                    parent.set_mtime(Mtime::now());
                }
            }
            self.entries
                .insert(planned.entry.path().clone(), planned.entry);
        }
    }

    /// Remove an entry from the tree.
    ///
    /// # Errors
    /// * `IsRoot` - the root cannot be unlinked
    /// * `NotFound` - no entry at the path
    /// * `DirectoryNotEmpty` - the directory still has children
    /// * `Corrupt` - the parent entry or child name reference was missing,
    ///   which indicates a bug in the federation layer
    pub fn unlink(&mut self, path: &EntryPath) -> Result<(), StructuralError> {
        if self.read_only {
            return Err(StructuralError::ReadOnly);
        }
        if path.is_root() {
            return Err(StructuralError::IsRoot);
        }
        let entry: &Entry = self
            .entries
            .get(path)
            .ok_or_else(|| StructuralError::not_found(path.as_str()))?;
        if let Some(children) = entry.children() {
            if !children.is_empty() {
                return Err(StructuralError::DirectoryNotEmpty {
                    path: path.as_str().to_string(),
                });
            }
        }

        let (parent_path, base) = path.parent_and_base().ok_or(StructuralError::IsRoot)?;
        let base: String = base.to_string();

        self.entries.remove(path);

        let parent: &mut Entry =
            self.entries
                .get_mut(&parent_path)
                .ok_or(StructuralError::Corrupt {
                    path: path.as_str().to_string(),
                    detail: "parent entry missing on unlink",
                })?;
        let ghost: bool = parent.is_ghost();
        let removed: bool = parent
            .children_mut()
            .map(|c| c.remove(&base))
            .unwrap_or(false);
        if !removed {
            return Err(StructuralError::Corrupt {
                path: path.as_str().to_string(),
                detail: "child name missing from parent on unlink",
            });
        }
        if !ghost {
            parent.set_mtime(Mtime::now());
        }
        self.touch_count += 1;
        Ok(())
    }

    /// All entries sorted by path, the root first.
    ///
    /// Used by sync to write entries out in a deterministic parent-first
    /// order.
    pub fn entries_sorted(&self) -> Vec<&Entry> {
        let mut all: Vec<&Entry> = self.entries.values().collect();
        all.sort_by(|a, b| a.path().cmp(b.path()));
        all
    }
}

impl Default for EntryTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> EntryPath {
        EntryPath::new(s).unwrap()
    }

    #[test]
    fn test_new_tree_has_root_directory() {
        let tree: EntryTree = EntryTree::new();
        let root: &Entry = tree.get(&EntryPath::root()).unwrap();
        assert!(root.is_directory());
        assert!(root.mtime().is_known());
        assert_eq!(tree.touch_count(), 0);
    }

    #[test]
    fn test_link_file_with_parents() {
        let mut tree: EntryTree = EntryTree::new();
        tree.link(&path("x/y"), EntryType::File, true, None).unwrap();

        let x: &Entry = tree.get(&path("x")).unwrap();
        assert!(x.is_directory());
        assert!(x.mtime().is_known());
        let y: &Entry = tree.get(&path("x/y")).unwrap();
        assert!(y.is_file());

        let listing: Vec<String> = tree.list(&EntryPath::root()).unwrap();
        assert_eq!(listing, vec!["x".to_string()]);
        assert_eq!(tree.touch_count(), 1);
    }

    #[test]
    fn test_link_without_parent_fails() {
        let mut tree: EntryTree = EntryTree::new();
        let err = tree.link(&path("x/y"), EntryType::File, false, None);
        assert!(matches!(err, Err(StructuralError::MissingParent { .. })));
        assert_eq!(tree.touch_count(), 0);
        assert!(tree.get(&path("x")).is_none());
    }

    #[test]
    fn test_link_root_fails() {
        let mut tree: EntryTree = EntryTree::new();
        let err = tree.link(&EntryPath::root(), EntryType::Directory, false, None);
        assert!(matches!(err, Err(StructuralError::IsRoot)));
    }

    #[test]
    fn test_directory_link_never_replaces() {
        let mut tree: EntryTree = EntryTree::new();
        tree.link(&path("a"), EntryType::File, false, None).unwrap();
        let err = tree.link(&path("a"), EntryType::Directory, false, None);
        assert!(matches!(err, Err(StructuralError::EntryExists { .. })));
    }

    #[test]
    fn test_file_link_never_replaces_directory() {
        let mut tree: EntryTree = EntryTree::new();
        tree.link(&path("d"), EntryType::Directory, false, None)
            .unwrap();
        let err = tree.link(&path("d"), EntryType::File, false, None);
        assert!(matches!(err, Err(StructuralError::EntryExists { .. })));
    }

    #[test]
    fn test_file_link_replaces_file() {
        let mut tree: EntryTree = EntryTree::new();
        tree.link(&path("f"), EntryType::File, false, None).unwrap();
        let template: Entry =
            Entry::new(path("f"), EntryType::File, Mtime::now()).with_size(42);
        tree.link(&path("f"), EntryType::File, false, Some(&template))
            .unwrap();
        assert_eq!(tree.get(&path("f")).unwrap().size(), 42);
        assert_eq!(tree.touch_count(), 2);
    }

    #[test]
    fn test_link_under_file_parent_fails() {
        let mut tree: EntryTree = EntryTree::new();
        tree.link(&path("f"), EntryType::File, false, None).unwrap();
        let err = tree.link(&path("f/g"), EntryType::File, true, None);
        assert!(matches!(err, Err(StructuralError::NotADirectory { .. })));
    }

    #[test]
    fn test_unlink_file() {
        let mut tree: EntryTree = EntryTree::new();
        tree.link(&path("d"), EntryType::Directory, false, None)
            .unwrap();
        tree.link(&path("d/f"), EntryType::File, false, None).unwrap();
        tree.unlink(&path("d/f")).unwrap();
        assert!(tree.get(&path("d/f")).is_none());
        assert!(tree.list(&path("d")).unwrap().is_empty());
    }

    #[test]
    fn test_unlink_non_empty_directory_fails() {
        let mut tree: EntryTree = EntryTree::new();
        tree.link(&path("d/f"), EntryType::File, true, None).unwrap();
        let err = tree.unlink(&path("d"));
        assert!(matches!(err, Err(StructuralError::DirectoryNotEmpty { .. })));
        // After removing the child the directory can go.
        tree.unlink(&path("d/f")).unwrap();
        tree.unlink(&path("d")).unwrap();
        assert!(tree.get(&path("d")).is_none());
    }

    #[test]
    fn test_unlink_root_fails() {
        let mut tree: EntryTree = EntryTree::new();
        assert!(matches!(
            tree.unlink(&EntryPath::root()),
            Err(StructuralError::IsRoot)
        ));
    }

    #[test]
    fn test_read_only_rejects_mutations() {
        let mut tree: EntryTree = EntryTree::from_scan(Vec::new(), true);
        assert!(matches!(
            tree.link(&path("a"), EntryType::File, false, None),
            Err(StructuralError::ReadOnly)
        ));
        assert!(matches!(
            tree.set_mtime(&EntryPath::root(), Mtime::now()),
            Err(StructuralError::ReadOnly)
        ));
    }

    #[test]
    fn test_scan_repairs_orphans_with_ghosts() {
        let scanned: Vec<Entry> = vec![Entry::new(
            path("a/b/c.txt"),
            EntryType::File,
            Mtime::now(),
        )
        .with_size(3)];
        let tree: EntryTree = EntryTree::from_scan(scanned, false);

        let a: &Entry = tree.get(&path("a")).unwrap();
        assert!(a.is_ghost());
        let b: &Entry = tree.get(&path("a/b")).unwrap();
        assert!(b.is_ghost());
        assert_eq!(tree.list(&path("a/b")).unwrap(), vec!["c.txt".to_string()]);
        assert_eq!(tree.touch_count(), 0);
    }

    #[test]
    fn test_ghost_parent_time_not_updated_by_child_insert() {
        let scanned: Vec<Entry> = vec![Entry::new(
            path("g/f1"),
            EntryType::File,
            Mtime::now(),
        )];
        let mut tree: EntryTree = EntryTree::from_scan(scanned, false);
        assert!(tree.get(&path("g")).unwrap().is_ghost());

        tree.link(&path("g/f2"), EntryType::File, false, None).unwrap();
        // Still a ghost: child insertion must not stamp its time.
        assert!(tree.get(&path("g")).unwrap().is_ghost());
    }

    #[test]
    fn test_entries_sorted_parent_first() {
        let mut tree: EntryTree = EntryTree::new();
        tree.link(&path("b/x"), EntryType::File, true, None).unwrap();
        tree.link(&path("a"), EntryType::File, false, None).unwrap();
        let paths: Vec<&str> = tree
            .entries_sorted()
            .iter()
            .map(|e| e.path().as_str())
            .collect();
        assert_eq!(paths, vec!["", "a", "b", "b/x"]);
    }
}
