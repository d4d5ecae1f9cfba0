//! Inode-to-path bookkeeping for the passthrough layer.
//!
//! The kernel speaks inode numbers; the scheduler and the backing store
//! speak paths. This table interns every path the kernel has looked up and
//! keeps the mapping consistent across rename and unlink. Entries live
//! until the kernel forgets them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root of the mount is always inode 1.
pub(crate) const ROOT_INO: u64 = 1;

#[derive(Debug)]
struct InodeEntry {
    path: PathBuf,
    /// Kernel lookup count; the entry is dropped when this reaches zero.
    nlookup: u64,
}

#[derive(Debug)]
pub(crate) struct InodeTable {
    by_ino: HashMap<u64, InodeEntry>,
    by_path: HashMap<PathBuf, u64>,
    next_ino: u64,
}

impl InodeTable {
    pub(crate) fn new(root: PathBuf) -> Self {
        let mut by_ino = HashMap::new();
        let mut by_path = HashMap::new();
        by_ino.insert(
            ROOT_INO,
            InodeEntry {
                path: root.clone(),
                nlookup: 0,
            },
        );
        by_path.insert(root, ROOT_INO);
        Self {
            by_ino,
            by_path,
            next_ino: ROOT_INO + 1,
        }
    }

    /// The backing path for `ino`, if the kernel still knows it.
    pub(crate) fn path(&self, ino: u64) -> Option<&Path> {
        self.by_ino.get(&ino).map(|entry| entry.path.as_path())
    }

    /// Intern `path`, bumping the lookup count. Returns its inode number.
    pub(crate) fn intern(&mut self, path: PathBuf) -> u64 {
        if let Some(&ino) = self.by_path.get(&path) {
            if let Some(entry) = self.by_ino.get_mut(&ino) {
                entry.nlookup += 1;
            }
            return ino;
        }
        let ino = self.next_ino;
        self.next_ino += 1;
        self.by_ino.insert(ino, InodeEntry { path: path.clone(), nlookup: 1 });
        self.by_path.insert(path, ino);
        ino
    }

    /// Drop `nlookup` references from `ino`; the root is never dropped.
    pub(crate) fn forget(&mut self, ino: u64, nlookup: u64) {
        if ino == ROOT_INO {
            return;
        }
        let remove = match self.by_ino.get_mut(&ino) {
            Some(entry) => {
                entry.nlookup = entry.nlookup.saturating_sub(nlookup);
                entry.nlookup == 0
            }
            None => false,
        };
        if remove {
            if let Some(entry) = self.by_ino.remove(&ino) {
                // Only unmap the path if it still points at this inode; a
                // rename or unlink may have remapped it already.
                if self.by_path.get(&entry.path) == Some(&ino) {
                    self.by_path.remove(&entry.path);
                }
            }
        }
    }

    /// The path no longer names a file; future lookups must not reuse its
    /// inode. The inode itself stays until the kernel forgets it.
    pub(crate) fn unlink(&mut self, path: &Path) {
        self.by_path.remove(path);
    }

    /// Rewrite `old` (and, for directories, everything under it) to `new`.
    pub(crate) fn rename(&mut self, old: &Path, new: &Path) {
        // Anything already at the destination has been replaced.
        self.unlink(new);

        let moved: Vec<u64> = self
            .by_ino
            .iter()
            .filter(|(_, entry)| entry.path.starts_with(old))
            .map(|(&ino, _)| ino)
            .collect();
        for ino in moved {
            let Some(entry) = self.by_ino.get_mut(&ino) else {
                continue;
            };
            let Ok(suffix) = entry.path.strip_prefix(old) else {
                continue;
            };
            let updated = new.join(suffix);
            self.by_path.remove(&entry.path);
            entry.path = updated.clone();
            self.by_path.insert(updated, ino);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> InodeTable {
        InodeTable::new(PathBuf::from("/backing"))
    }

    #[test]
    fn root_is_inode_one() {
        let table = table();
        assert_eq!(table.path(ROOT_INO), Some(Path::new("/backing")));
    }

    #[test]
    fn interning_the_same_path_reuses_the_inode() {
        let mut table = table();
        let a = table.intern(PathBuf::from("/backing/a"));
        let again = table.intern(PathBuf::from("/backing/a"));
        let b = table.intern(PathBuf::from("/backing/b"));
        assert_eq!(a, again);
        assert_ne!(a, b);
    }

    #[test]
    fn forget_drops_the_entry_at_zero_lookups() {
        let mut table = table();
        let a = table.intern(PathBuf::from("/backing/a"));
        table.intern(PathBuf::from("/backing/a"));
        table.forget(a, 1);
        assert!(table.path(a).is_some());
        table.forget(a, 1);
        assert!(table.path(a).is_none());

        // The path is free for a fresh inode now.
        let reborn = table.intern(PathBuf::from("/backing/a"));
        assert_ne!(reborn, a);
    }

    #[test]
    fn forget_never_drops_the_root() {
        let mut table = table();
        table.forget(ROOT_INO, u64::MAX);
        assert!(table.path(ROOT_INO).is_some());
    }

    #[test]
    fn unlinked_paths_do_not_resolve_to_stale_inodes() {
        let mut table = table();
        let a = table.intern(PathBuf::from("/backing/a"));
        table.unlink(Path::new("/backing/a"));
        // The kernel still holds the inode...
        assert!(table.path(a).is_some());
        // ...but a new file at the same name is a new inode.
        let replacement = table.intern(PathBuf::from("/backing/a"));
        assert_ne!(replacement, a);
    }

    #[test]
    fn rename_moves_a_directory_and_its_children() {
        let mut table = table();
        let dir = table.intern(PathBuf::from("/backing/dir"));
        let child = table.intern(PathBuf::from("/backing/dir/child"));

        table.rename(Path::new("/backing/dir"), Path::new("/backing/moved"));

        assert_eq!(table.path(dir), Some(Path::new("/backing/moved")));
        assert_eq!(table.path(child), Some(Path::new("/backing/moved/child")));
        let reinterned = table.intern(PathBuf::from("/backing/moved/child"));
        assert_eq!(reinterned, child);
    }

    #[test]
    fn rename_over_an_existing_path_replaces_it() {
        let mut table = table();
        let victim = table.intern(PathBuf::from("/backing/b"));
        let a = table.intern(PathBuf::from("/backing/a"));

        table.rename(Path::new("/backing/a"), Path::new("/backing/b"));

        assert_eq!(table.path(a), Some(Path::new("/backing/b")));
        let resolved = table.intern(PathBuf::from("/backing/b"));
        assert_eq!(resolved, a);
        assert_ne!(resolved, victim);
    }
}
