//! Depth-limited snapshots of versioned subtrees.
//!
//! A merge compares the current working state of a path it is about to
//! delete against the merge-left side; both are expressed as a
//! [`TreeSnapshot`].

use std::collections::BTreeMap;
use std::path::Path;

use super::Divergence;
use crate::entries;
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{Depth, NodeKind, Props};

/// File contents and properties of a subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeSnapshot {
    File {
        content: Vec<u8>,
        props: Props,
    },
    Dir {
        props: Props,
        children: BTreeMap<String, TreeSnapshot>,
    },
}

impl TreeSnapshot {
    pub fn file(content: impl Into<Vec<u8>>, props: Props) -> Self {
        Self::File {
            content: content.into(),
            props,
        }
    }

    pub fn dir(props: Props, children: BTreeMap<String, TreeSnapshot>) -> Self {
        Self::Dir { props, children }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::File { .. } => NodeKind::File,
            Self::Dir { .. } => NodeKind::Dir,
        }
    }

    /// Capture the working state of the versioned node `path` to `depth`.
    ///
    /// Returns `None` when nothing is on disk. Unversioned children are not
    /// part of a snapshot.
    pub fn capture(set: &LockSet, path: &Path, depth: Depth) -> Result<Option<Self>, WcError> {
        match NodeKind::on_disk(path)? {
            NodeKind::File => {
                let content = std::fs::read(path)?;
                let props = entries::node_props(set, path)?.working;
                Ok(Some(Self::File { content, props }))
            }
            NodeKind::Dir => {
                let props = entries::node_props(set, path)?.working;
                let mut children = BTreeMap::new();
                if depth.includes_files() {
                    let table = entries::dir_entries(set, path)?;
                    for entry in table
                        .entries
                        .values()
                        .filter(|e| !e.name.is_empty() && !e.is_hidden())
                    {
                        if entry.kind == NodeKind::Dir && !depth.includes_dirs() {
                            continue;
                        }
                        let child = Self::capture(set, &path.join(&entry.name), depth.descend())?;
                        if let Some(child) = child {
                            children.insert(entry.name.clone(), child);
                        }
                    }
                }
                Ok(Some(Self::Dir { props, children }))
            }
            _ => Ok(None),
        }
    }

    /// Whether two snapshots agree to `depth`.
    ///
    /// Directories are equal when their properties match, and every file
    /// child (and, where `depth` reaches them, every subdirectory) is equal.
    pub fn equal_to_depth(&self, other: &Self, depth: Depth) -> bool {
        match (self, other) {
            (
                Self::File { content, props },
                Self::File {
                    content: other_content,
                    props: other_props,
                },
            ) => content == other_content && props == other_props,
            (
                Self::Dir { props, children },
                Self::Dir {
                    props: other_props,
                    children: other_children,
                },
            ) => {
                if props != other_props {
                    return false;
                }
                if !depth.includes_files() {
                    return true;
                }
                let in_scope = |c: &&Self| c.kind() == NodeKind::File || depth.includes_dirs();
                let mine: Vec<(&String, &Self)> =
                    children.iter().filter(|(_, c)| in_scope(c)).collect();
                let theirs: Vec<(&String, &Self)> =
                    other_children.iter().filter(|(_, c)| in_scope(c)).collect();
                mine.len() == theirs.len()
                    && mine.iter().zip(theirs.iter()).all(|((a_name, a), (b_name, b))| {
                        a_name == b_name && a.equal_to_depth(b, depth.descend())
                    })
            }
            _ => false,
        }
    }
}

/// How `local` diverges from the merge-left snapshot `left`, if at all.
pub fn divergence(left: &TreeSnapshot, local: Option<&TreeSnapshot>, depth: Depth) -> Option<Divergence> {
    let local = local?;
    if left.kind() != local.kind() {
        Some(Divergence::Kind)
    } else if left.equal_to_depth(local, depth) {
        None
    } else {
        Some(Divergence::Content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::lock::{LockDepth, LockMode};
    use crate::testutil::{checkout, Node};

    fn file(text: &str) -> TreeSnapshot {
        TreeSnapshot::file(text.as_bytes(), Props::new())
    }

    #[test]
    fn test_depth_limits_comparison() {
        let mut deep_a = BTreeMap::new();
        deep_a.insert("x".to_string(), file("1"));
        let mut deep_b = BTreeMap::new();
        deep_b.insert("x".to_string(), file("2"));

        let mut a = BTreeMap::new();
        a.insert("f".to_string(), file("same"));
        a.insert("sub".to_string(), TreeSnapshot::dir(Props::new(), deep_a));
        let mut b = BTreeMap::new();
        b.insert("f".to_string(), file("same"));
        b.insert("sub".to_string(), TreeSnapshot::dir(Props::new(), deep_b));

        let a = TreeSnapshot::dir(Props::new(), a);
        let b = TreeSnapshot::dir(Props::new(), b);
        assert!(!a.equal_to_depth(&b, Depth::Infinity));
        assert!(a.equal_to_depth(&b, Depth::Files));
        assert!(a.equal_to_depth(&b, Depth::Immediates));
    }

    #[test]
    fn test_divergence_kinds() {
        let left = file("a");
        assert_eq!(divergence(&left, Some(&file("a")), Depth::Infinity), None);
        assert_eq!(
            divergence(&left, Some(&file("b")), Depth::Infinity),
            Some(Divergence::Content)
        );
        let dir = TreeSnapshot::dir(Props::new(), BTreeMap::new());
        assert_eq!(divergence(&left, Some(&dir), Depth::Infinity), Some(Divergence::Kind));
        assert_eq!(divergence(&left, None, Depth::Infinity), None);
    }

    #[test]
    fn test_capture_working_tree() {
        let wc = checkout(&[Node::dir("d"), Node::file("d/a.txt", "a\n")]);
        let cancel = CancellationToken::new();
        let (set, _) =
            LockSet::open(&wc.config, &wc.root, LockMode::Read, LockDepth::INFINITE, &cancel).unwrap();
        std::fs::write(wc.root.join("d").join("stray"), "x").unwrap();

        let snap = TreeSnapshot::capture(&set, &wc.root.join("d"), Depth::Infinity)
            .unwrap()
            .unwrap();
        let mut expected = BTreeMap::new();
        expected.insert("a.txt".to_string(), file("a\n"));
        assert_eq!(snap, TreeSnapshot::dir(Props::new(), expected));
        assert!(TreeSnapshot::capture(&set, &wc.root.join("nope"), Depth::Infinity)
            .unwrap()
            .is_none());
    }
}
