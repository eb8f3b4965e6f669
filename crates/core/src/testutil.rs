//! Builders for throw-away working copies used by unit tests.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::adm::{self, pristine, store, AdmInit, AdmPaths};
use crate::config::WcConfig;
use crate::entries::Entry;
use crate::models::{join_url, Depth, NodeKind};

pub const REPOS: &str = "http://svn.example.com/repo";

/// A node of a checkout, path relative to the root with `/` separators.
pub struct Node {
    pub path: &'static str,
    pub content: Option<&'static str>,
}

impl Node {
    pub fn file(path: &'static str, content: &'static str) -> Self {
        Self {
            path,
            content: Some(content),
        }
    }

    pub fn dir(path: &'static str) -> Self {
        Self {
            path,
            content: None,
        }
    }
}

pub struct TestWc {
    pub _tmp: tempfile::TempDir,
    pub root: PathBuf,
    pub config: WcConfig,
}

fn url_of(rel: &str) -> String {
    join_url(&format!("{}/trunk", REPOS), rel)
}

fn init(url: String) -> AdmInit {
    AdmInit {
        url,
        repos: Some(REPOS.into()),
        uuid: Some("0000-test-uuid".into()),
        revision: 1,
        depth: Depth::Infinity,
    }
}

/// Materialize `nodes` at revision 1; parents must precede children.
pub fn checkout(nodes: &[Node]) -> TestWc {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("wc");
    let config = WcConfig::default();
    std::fs::create_dir_all(&root).unwrap();
    adm::ensure_adm(&config, &root, &init(url_of(""))).unwrap();

    for node in nodes {
        let path = root.join(node.path);
        let (parent_rel, name) = match node.path.rsplit_once('/') {
            Some((p, n)) => (p, n),
            None => ("", node.path),
        };
        let parent = if parent_rel.is_empty() {
            root.clone()
        } else {
            root.join(parent_rel)
        };
        let parent_adm = AdmPaths::new(&config, &parent);
        let mut parent_file = store::read_entries_file(&parent_adm).unwrap();

        let mut entry = Entry::new(name, NodeKind::Dir);
        entry.revision = Some(1);
        match node.content {
            None => {
                std::fs::create_dir_all(&path).unwrap();
                adm::ensure_adm(&config, &path, &init(url_of(node.path))).unwrap();
            }
            Some(text) => {
                std::fs::write(&path, text).unwrap();
                entry.kind = NodeKind::File;
                entry.url = Some(url_of(node.path));
                entry.checksum = Some(pristine::install(&parent_adm, text.as_bytes()).unwrap());
                stamp(&mut entry, &path);
            }
        }
        parent_file.entries.insert(name.to_string(), entry);
        store::write_entries_file(&parent_adm, &parent_file).unwrap();
    }

    TestWc {
        _tmp: tmp,
        root,
        config,
    }
}

/// Record the current on-disk timestamp and size of `path` in `entry`.
pub fn stamp(entry: &mut Entry, path: &Path) {
    let meta = std::fs::metadata(path).unwrap();
    entry.text_time = Some(DateTime::<Utc>::from(meta.modified().unwrap()));
    entry.working_size = Some(meta.len());
}
