use std::path::Path;

use tracing::debug;

use crate::entries::{self, Schedule};
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{
    normalize, NodeKind, Props, PROP_ENTRY_PREFIX, PROP_EOL_STYLE, PROP_EXECUTABLE,
    PROP_EXTERNALS, PROP_IGNORE, PROP_KEYWORDS, PROP_MIME_TYPE, PROP_NEEDS_LOCK, PROP_WC_PREFIX,
};
use crate::notify::{emit, Notification, NotificationSink, NotifyAction, NotifyState};

const FILE_ONLY: &[&str] = &[
    PROP_MIME_TYPE,
    PROP_EXECUTABLE,
    PROP_EOL_STYLE,
    PROP_KEYWORDS,
    PROP_NEEDS_LOCK,
];
const DIR_ONLY: &[&str] = &[PROP_IGNORE, PROP_EXTERNALS];
const EOL_STYLES: &[&str] = &["native", "LF", "CR", "CRLF"];

/// Working properties of `path`; empty when it is not versioned.
pub fn prop_list(set: &LockSet, path: &Path) -> Result<Props, WcError> {
    let path = normalize(path);
    if entries::entry(set, &path, false)?.is_none() {
        return Ok(Props::new());
    }
    Ok(entries::node_props(set, &path)?.working)
}

/// The working value of property `name` on `path`.
pub fn prop_get(set: &LockSet, path: &Path, name: &str) -> Result<Option<String>, WcError> {
    let path = normalize(path);
    require_regular(&path, name)?;
    Ok(prop_list(set, &path)?.remove(name))
}

/// Set property `name` of `path` to `value`, or delete it with `None`.
///
/// Unless `skip_checks`, `svn:` properties are checked against the node
/// kind and their value format, and boolean properties are normalized to
/// `*`. Setting a property to its current value is a no-op and is not
/// notified.
pub fn prop_set(
    set: &mut LockSet,
    path: &Path,
    name: &str,
    value: Option<&str>,
    skip_checks: bool,
    notify: &dyn NotificationSink,
) -> Result<(), WcError> {
    let path = normalize(path);
    require_regular(&path, name)?;
    let entry = entries::entry(set, &path, false)?
        .ok_or_else(|| WcError::EntryNotFound(path.clone()))?;
    if entry.schedule == Schedule::Delete {
        return Err(WcError::InvalidOperation {
            path,
            detail: "cannot set properties on a node scheduled for deletion".into(),
        });
    }
    let value = match value {
        Some(v) if !skip_checks => Some(checked_value(&path, entry.kind, name, v)?),
        other => other.map(str::to_string),
    };

    let mut node = entries::node_props(set, &path)?;
    let old = match &value {
        Some(v) => node.working.insert(name.to_string(), v.clone()),
        None => node.working.remove(name),
    };
    if old == value {
        return Ok(());
    }
    entries::write_node_props(set, &path, node)?;

    let action = match (&old, &value) {
        (None, Some(_)) => NotifyAction::PropertyAdded,
        (Some(_), Some(_)) => NotifyAction::PropertyModified,
        (_, None) => NotifyAction::PropertyDeleted,
    };
    debug!(path = %path.display(), name, %action, "property changed");
    emit(
        notify,
        Notification::new(&path, action)
            .with_kind(entry.kind)
            .with_states(NotifyState::Inapplicable, NotifyState::Changed),
    );
    Ok(())
}

fn require_regular(path: &Path, name: &str) -> Result<(), WcError> {
    if name.starts_with(PROP_ENTRY_PREFIX) || name.starts_with(PROP_WC_PREFIX) {
        return Err(WcError::InvalidOperation {
            path: path.to_path_buf(),
            detail: format!("'{}' is not a regular property", name),
        });
    }
    Ok(())
}

fn checked_value(path: &Path, kind: NodeKind, name: &str, value: &str) -> Result<String, WcError> {
    let invalid = |detail: String| WcError::InvalidOperation {
        path: path.to_path_buf(),
        detail,
    };
    if kind == NodeKind::Dir && FILE_ONLY.contains(&name) {
        return Err(invalid(format!("'{}' cannot be set on a directory", name)));
    }
    if kind == NodeKind::File && DIR_ONLY.contains(&name) {
        return Err(invalid(format!("'{}' cannot be set on a file", name)));
    }
    match name {
        PROP_MIME_TYPE => {
            let value = value.trim();
            let valid = value
                .split_once('/')
                .is_some_and(|(t, s)| !t.is_empty() && !s.is_empty() && !value.contains(char::is_whitespace));
            if !valid {
                return Err(invalid(format!("'{}' is not a valid MIME type", value)));
            }
            Ok(value.to_string())
        }
        PROP_EOL_STYLE => {
            let value = value.trim();
            if !EOL_STYLES.contains(&value) {
                return Err(invalid(format!("unrecognized line ending style '{}'", value)));
            }
            Ok(value.to_string())
        }
        PROP_EXECUTABLE | PROP_NEEDS_LOCK => Ok("*".to_string()),
        _ => Ok(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::lock::{LockDepth, LockMode};
    use crate::notify::{NotificationLog, NullSink};
    use crate::status::{status, StatusKind};
    use crate::testutil::{checkout, Node, TestWc};

    fn open(wc: &TestWc) -> LockSet {
        let cancel = CancellationToken::new();
        LockSet::open(&wc.config, &wc.root, LockMode::Write, LockDepth::INFINITE, &cancel)
            .unwrap()
            .0
    }

    #[test]
    fn test_set_modify_delete_notifies() {
        let wc = checkout(&[Node::file("a.txt", "a\n")]);
        let mut set = open(&wc);
        let a = wc.root.join("a.txt");
        let log = NotificationLog::new();

        prop_set(&mut set, &a, "color", Some("red"), false, &log).unwrap();
        prop_set(&mut set, &a, "color", Some("red"), false, &log).unwrap();
        prop_set(&mut set, &a, "color", Some("blue"), false, &log).unwrap();
        assert_eq!(prop_get(&set, &a, "color").unwrap().as_deref(), Some("blue"));
        assert_eq!(status(&set, &a).unwrap().prop_status, StatusKind::Modified);

        prop_set(&mut set, &a, "color", None, false, &log).unwrap();
        prop_set(&mut set, &a, "color", None, false, &log).unwrap();
        assert_eq!(
            log.actions(),
            vec![
                NotifyAction::PropertyAdded,
                NotifyAction::PropertyModified,
                NotifyAction::PropertyDeleted,
            ]
        );
        assert!(prop_list(&set, &a).unwrap().is_empty());
        let entry = entries::entry(&set, &a, false).unwrap().unwrap();
        assert!(!entry.has_props);
    }

    #[test]
    fn test_directory_properties() {
        let wc = checkout(&[Node::dir("d")]);
        let mut set = open(&wc);
        let d = wc.root.join("d");
        prop_set(&mut set, &d, PROP_IGNORE, Some("*.log\n"), false, &NullSink).unwrap();
        assert_eq!(prop_list(&set, &d).unwrap()[PROP_IGNORE], "*.log\n");

        let err = prop_set(&mut set, &d, PROP_MIME_TYPE, Some("text/plain"), false, &NullSink)
            .unwrap_err();
        assert!(matches!(err, WcError::InvalidOperation { .. }));
    }

    #[test]
    fn test_value_checks_and_normalization() {
        let wc = checkout(&[Node::file("a.bin", "\0\0")]);
        let mut set = open(&wc);
        let a = wc.root.join("a.bin");

        for (name, value) in [
            (PROP_MIME_TYPE, "octet-stream"),
            (PROP_EOL_STYLE, "sideways"),
            (PROP_IGNORE, "*.o"),
        ] {
            let err = prop_set(&mut set, &a, name, Some(value), false, &NullSink).unwrap_err();
            assert!(matches!(err, WcError::InvalidOperation { .. }), "{name}");
        }
        prop_set(&mut set, &a, PROP_MIME_TYPE, Some(" application/octet-stream\n"), false, &NullSink)
            .unwrap();
        prop_set(&mut set, &a, PROP_EXECUTABLE, Some("yes"), false, &NullSink).unwrap();
        let props = prop_list(&set, &a).unwrap();
        assert_eq!(props[PROP_MIME_TYPE], "application/octet-stream");
        assert_eq!(props[PROP_EXECUTABLE], "*");

        prop_set(&mut set, &a, PROP_EOL_STYLE, Some("sideways"), true, &NullSink).unwrap();
        assert_eq!(prop_get(&set, &a, PROP_EOL_STYLE).unwrap().as_deref(), Some("sideways"));
    }

    #[test]
    fn test_bookkeeping_names_and_unversioned_paths() {
        let wc = checkout(&[Node::file("a.txt", "a\n")]);
        let mut set = open(&wc);
        let a = wc.root.join("a.txt");
        for name in ["svn:entry:committed-rev", "svn:wc:ra_dav:version-url"] {
            assert!(prop_get(&set, &a, name).is_err());
            assert!(prop_set(&mut set, &a, name, Some("1"), true, &NullSink).is_err());
        }

        let stray = wc.root.join("stray.txt");
        std::fs::write(&stray, "s").unwrap();
        assert!(prop_list(&set, &stray).unwrap().is_empty());
        assert!(matches!(
            prop_set(&mut set, &stray, "color", Some("red"), false, &NullSink),
            Err(WcError::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_scheduled_delete_refuses_changes() {
        let wc = checkout(&[Node::file("a.txt", "a\n")]);
        let mut set = open(&wc);
        let a = wc.root.join("a.txt");
        entries::modify_entry(&mut set, &a, |e| e.schedule = Schedule::Delete).unwrap();
        assert!(matches!(
            prop_set(&mut set, &a, "color", Some("red"), false, &NullSink),
            Err(WcError::InvalidOperation { .. })
        ));
    }
}
