use std::path::{Path, PathBuf};

use tracing::info;

use crate::cancel::CancellationToken;
use crate::entries::{self, Entry};
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{normalize, NodeKind};

/// A rewritten repository reference, offered to the validator before any
/// entry changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Relocation<'a> {
    pub uuid: Option<&'a str>,
    pub url: &'a str,
    /// The new repository root, when the entry records one.
    pub repos: Option<&'a str>,
}

/// Replace the `from` prefix of every repository URL recorded at `path`
/// (and, with `recurse`, below it) by `to`.
///
/// Every rewritten URL is passed to `validate` first; nothing is written
/// if any call fails. Entries whose URLs do not start with `from` are left
/// alone, but the target's own URL must.
pub fn relocate<F>(
    set: &mut LockSet,
    path: &Path,
    from: &str,
    to: &str,
    recurse: bool,
    cancel: &CancellationToken,
    mut validate: F,
) -> Result<usize, WcError>
where
    F: FnMut(&Relocation<'_>) -> Result<(), WcError>,
{
    let path = normalize(path);
    let target = entries::entry(set, &path, false)?
        .ok_or_else(|| WcError::EntryNotFound(path.clone()))?;
    if !target.url.as_deref().is_some_and(|url| under(url, from)) {
        return Err(WcError::InvalidOperation {
            path,
            detail: format!("URL does not begin with '{}'", from),
        });
    }

    let mut planned: Vec<(PathBuf, Entry)> = Vec::new();
    entries::walk_entries(set, &path, false, cancel, |node, entry| {
        let nested = node != path && node.parent() != Some(path.as_path());
        if recurse || !nested {
            if let Some(moved) = rewrite(entry, from, to) {
                planned.push((node.to_path_buf(), moved));
            }
        }
        Ok(())
    })?;

    for (_, entry) in &planned {
        let Some(url) = entry.url.as_deref() else {
            continue;
        };
        validate(&Relocation {
            uuid: entry.uuid.as_deref(),
            url,
            repos: entry.repos.as_deref(),
        })?;
    }

    for (node, moved) in &planned {
        entries::modify_entry(set, node, |e| {
            // Leave the parent's stub of an open directory alone.
            if e.kind == NodeKind::Dir && e.name != moved.name {
                return;
            }
            e.url = moved.url.clone();
            e.repos = moved.repos.clone();
            e.copyfrom_url = moved.copyfrom_url.clone();
        })?;
    }
    info!(path = %path.display(), from, to, count = planned.len(), "relocated");
    Ok(planned.len())
}

fn under(url: &str, prefix: &str) -> bool {
    url.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'))
}

/// `entry` with its URLs moved, or `None` when nothing matched.
fn rewrite(entry: &Entry, from: &str, to: &str) -> Option<Entry> {
    let swap = |url: &Option<String>| -> Option<String> {
        url.as_deref()
            .filter(|u| under(u, from))
            .and_then(|u| u.strip_prefix(from))
            .map(|rest| format!("{}{}", to, rest))
    };
    let url = swap(&entry.url);
    let repos = swap(&entry.repos);
    let copyfrom_url = swap(&entry.copyfrom_url);
    if url.is_none() && repos.is_none() && copyfrom_url.is_none() {
        return None;
    }
    let mut moved = entry.clone();
    moved.url = url.or_else(|| entry.url.clone());
    moved.repos = repos.or_else(|| entry.repos.clone());
    moved.copyfrom_url = copyfrom_url.or_else(|| entry.copyfrom_url.clone());
    Some(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockDepth, LockMode};
    use crate::testutil::{checkout, Node, TestWc, REPOS};

    const NEW_REPOS: &str = "https://mirror.example.org/svn/repo";

    fn wc() -> TestWc {
        checkout(&[
            Node::file("a.txt", "a\n"),
            Node::dir("d"),
            Node::file("d/b.txt", "b\n"),
        ])
    }

    fn open(wc: &TestWc) -> LockSet {
        let cancel = CancellationToken::new();
        LockSet::open(&wc.config, &wc.root, LockMode::Write, LockDepth::INFINITE, &cancel)
            .unwrap()
            .0
    }

    fn url(set: &LockSet, path: &Path) -> String {
        entries::entry(set, path, false).unwrap().unwrap().url.unwrap()
    }

    #[test]
    fn test_recursive_relocate_rewrites_every_entry() {
        let wc = wc();
        let mut set = open(&wc);
        let mut seen = Vec::new();
        let count = relocate(&mut set, &wc.root, REPOS, NEW_REPOS, true, &CancellationToken::new(), |r| {
            seen.push(r.url.to_string());
            Ok(())
        })
        .unwrap();

        assert_eq!(count, 4);
        assert_eq!(seen.len(), 4);
        assert_eq!(url(&set, &wc.root.join("d").join("b.txt")), format!("{NEW_REPOS}/trunk/d/b.txt"));
        let root = entries::entry(&set, &wc.root, false).unwrap().unwrap();
        assert_eq!(root.repos.as_deref(), Some(NEW_REPOS));
        assert_eq!(root.url, Some(format!("{NEW_REPOS}/trunk")));
        // Directory stubs carry no URL and stay untouched.
        let stub = entries::entry_in(&set, set.retrieve(&wc.root).unwrap(), "d", false)
            .unwrap()
            .unwrap();
        assert_eq!(stub.url, None);
    }

    #[test]
    fn test_non_recursive_stops_at_children() {
        let wc = wc();
        let mut set = open(&wc);
        let count =
            relocate(&mut set, &wc.root, REPOS, NEW_REPOS, false, &CancellationToken::new(), |_| Ok(()))
                .unwrap();
        assert_eq!(count, 3);
        assert_eq!(url(&set, &wc.root.join("a.txt")), format!("{NEW_REPOS}/trunk/a.txt"));
        assert_eq!(url(&set, &wc.root.join("d").join("b.txt")), format!("{REPOS}/trunk/d/b.txt"));
    }

    #[test]
    fn test_rejected_url_writes_nothing() {
        let wc = wc();
        let mut set = open(&wc);
        let err = relocate(&mut set, &wc.root, REPOS, NEW_REPOS, true, &CancellationToken::new(), |r| {
            if r.url.ends_with("b.txt") {
                Err(WcError::InvalidOperation {
                    path: PathBuf::from(r.url),
                    detail: "unreachable".into(),
                })
            } else {
                Ok(())
            }
        })
        .unwrap_err();
        assert!(matches!(err, WcError::InvalidOperation { .. }));
        assert_eq!(url(&set, &wc.root.join("a.txt")), format!("{REPOS}/trunk/a.txt"));
    }

    #[test]
    fn test_prefix_must_match_whole_segments() {
        let wc = wc();
        let mut set = open(&wc);
        let partial = &REPOS[..REPOS.len() - 2];
        assert!(matches!(
            relocate(&mut set, &wc.root, partial, NEW_REPOS, true, &CancellationToken::new(), |_| Ok(())),
            Err(WcError::InvalidOperation { .. })
        ));
        assert!(matches!(
            relocate(&mut set, &wc.root, "svn://elsewhere", NEW_REPOS, true, &CancellationToken::new(), |_| Ok(())),
            Err(WcError::InvalidOperation { .. })
        ));
    }
}
