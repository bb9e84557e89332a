//! Classification of ref updates and the ancestry questions the rules ask.
//!
//! All ancestry is answered by merge-base queries against the [`Backend`]. Failing queries
//! are never propagated: each helper documents how it degrades.

use gix_hash::ObjectId;

use crate::backend::Backend;
use crate::protocol::RefUpdate;

/// What a single ref update does to its ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Both sides are null, nothing changes.
    NoOp,
    /// The ref is created.
    Creation,
    /// The ref is deleted.
    Deletion,
    /// The ref is set to the object it already points to.
    Unchanged,
    /// The old commit is an ancestor of the new one.
    FastForward,
    /// The old commit is not an ancestor of the new one, or this couldn't be proven.
    ForcePush,
}

/// Classify `update`, querying `backend` only if both sides exist and differ.
pub fn classify<B: Backend + ?Sized>(backend: &B, update: &RefUpdate) -> Classification {
    if update.is_noop() {
        Classification::NoOp
    } else if update.is_creation() {
        Classification::Creation
    } else if update.is_deletion() {
        Classification::Deletion
    } else if update.old == update.new {
        Classification::Unchanged
    } else if is_force_push(backend, update.old, update.new) {
        Classification::ForcePush
    } else {
        Classification::FastForward
    }
}

/// Return true if `new` does not descend from `old`.
///
/// Null ids on either side are never a force-push. If the merge-base can't be determined,
/// the update is considered a force-push as it can't be proven to be a fast-forward.
pub fn is_force_push<B: Backend + ?Sized>(backend: &B, old: ObjectId, new: ObjectId) -> bool {
    if old.is_null() || new.is_null() {
        return false;
    }
    match backend.merge_base(old, new) {
        Ok(Some(base)) => base != old,
        Ok(None) => {
            tracing::debug!(%old, %new, "histories are unrelated");
            true
        }
        Err(err) => {
            tracing::warn!(%old, %new, %err, "could not determine merge-base, assuming force-push");
            true
        }
    }
}

/// Return true if `commit` shares history with the tip of `master_ref`.
///
/// A missing master or a failing query means it doesn't.
pub fn is_branched_from<B: Backend + ?Sized>(backend: &B, commit: ObjectId, master_ref: &str) -> bool {
    let Some(master) = resolve_tip(backend, master_ref) else {
        return false;
    };
    match backend.merge_base(commit, master) {
        Ok(found) => found.is_some(),
        Err(err) => {
            tracing::warn!(%commit, master = master_ref, %err, "could not determine merge-base with master");
            false
        }
    }
}

/// Return true if `commit` is already part of the history of `master_ref`.
///
/// Anything that can't be confirmed, including a missing master, is considered not merged.
pub fn is_merged_into<B: Backend + ?Sized>(backend: &B, commit: ObjectId, master_ref: &str) -> bool {
    let Some(master) = resolve_tip(backend, master_ref) else {
        return false;
    };
    match backend.merge_base(commit, master) {
        Ok(found) => found == Some(commit),
        Err(err) => {
            tracing::warn!(%commit, master = master_ref, %err, "could not determine merge-base with master");
            false
        }
    }
}

/// Resolve `name`, logging failures and treating them like a missing ref.
pub(crate) fn resolve_tip<B: Backend + ?Sized>(backend: &B, name: &str) -> Option<ObjectId> {
    match backend.resolve_ref(name) {
        Ok(tip) => tip,
        Err(err) => {
            tracing::warn!(reference = name, %err, "could not resolve reference");
            None
        }
    }
}
