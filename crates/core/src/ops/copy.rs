use std::path::Path;

use tracing::info;

use crate::adm::{pristine, AdmPaths};
use crate::cancel::CancellationToken;
use crate::entries;
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{normalize, split_path, NodeKind};
use crate::notify::{emit, Notification, NotificationSink, NotifyAction};

use super::add::add;

/// Copy the versioned file `src` to `dst_parent/dst_name`, scheduled for
/// addition with history.
///
/// The source must be committed (a URL and revision to copy from); the copy
/// keeps its properties and shares its text base.
pub fn copy(
    set: &mut LockSet,
    src: &Path,
    dst_parent: &Path,
    dst_name: &str,
    cancel: &CancellationToken,
    notify: &dyn NotificationSink,
) -> Result<(), WcError> {
    cancel.check()?;
    let src = normalize(src);
    let dst = normalize(&dst_parent.join(dst_name));
    let entry = entries::entry(set, &src, false)?
        .ok_or_else(|| WcError::EntryNotFound(src.clone()))?;
    if entry.kind != NodeKind::File {
        return Err(WcError::InvalidOperation {
            path: src,
            detail: "only files can be copied".into(),
        });
    }
    let (Some(url), Some(rev)) = (entry.url.clone(), entry.revision) else {
        return Err(WcError::InvalidOperation {
            path: src,
            detail: "source has no repository history".into(),
        });
    };
    if entry.copied || rev <= 0 {
        return Err(WcError::InvalidOperation {
            path: src,
            detail: "source has no repository history".into(),
        });
    }
    if NodeKind::on_disk(&dst)? != NodeKind::None {
        return Err(WcError::Obstructed(dst));
    }

    let dst_id = set.retrieve(&normalize(dst_parent))?;
    set.require_write(dst_id)?;

    std::fs::copy(&src, &dst)?;
    let base_sum = match entry.checksum.as_deref() {
        Some(sum) => {
            let (src_parent, _) = split_path(&src)?;
            let data = pristine::read_verified(&AdmPaths::new(set.config(), &src_parent), sum, &src)?;
            Some(pristine::install(&set.adm(dst_id), &data)?)
        }
        None => None,
    };
    emit(notify, Notification::new(&dst, NotifyAction::Copy).with_kind(NodeKind::File));

    add(set, &dst, Some((&url, rev)), cancel, notify)?;

    let props = entries::node_props(set, &src)?;
    entries::modify_entry(set, &dst, |e| e.checksum = base_sum.clone())?;
    entries::write_node_props(set, &dst, props)?;
    if !crate::status::text_modified(set, &src, false)? {
        entries::stamp(set, &dst)?;
    }
    info!(src = %src.display(), dst = %dst.display(), copyfrom_rev = rev, "copied file");
    Ok(())
}
