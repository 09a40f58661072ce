//! Decision engine (C7)
//!
//! A pure function over `(local, peer, baseline, mode)` producing a typed
//! [`SyncAction`]. No I/O, no randomness — the same inputs always produce
//! the same action, which is what makes the three-way merge testable
//! without a filesystem.

use std::path::PathBuf;

use crate::digest::ContentDigest;
use crate::error::ConflictKind;
use crate::frontmatter::PeerMode;
use crate::syncstate::Baseline;

/// The side of a `(cast_id, peer)` pair as seen by the decision engine —
/// just enough of a `FileRec` to decide, nothing ephemeral-but-unrelated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Side {
    pub relpath: PathBuf,
    pub digest: ContentDigest,
}

/// The action the executor (C8) should take for one `(cast_id, peer)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// No disk change, no baseline change.
    NoOp,
    /// No disk change; remove the now-stale baseline entry.
    ClearBaseline,
    /// Copy local → peer (content + front matter).
    Push,
    /// Copy peer → local.
    Pull,
    /// Move the peer's file to match local's path.
    RenamePeer { old: PathBuf, new: PathBuf },
    /// Move the local file to match the peer's path.
    RenameLocal { old: PathBuf, new: PathBuf },
    /// Write a peer-side copy at a non-colliding alternate path; never
    /// overwrites a peer file with a different `cast-id`.
    SafePushCopy { to_peer_path: PathBuf, suffix: String },
    DeletePeer,
    DeleteLocal,
    Conflict(ConflictKind),
}

/// Whether this peer currently appears in the local file's `cast-hsync`
/// list, and if so, under which mode. `None` means the peer was dropped
/// from membership since the baseline was recorded (or never had it) —
/// we still process the pair to clean up a stale baseline, but never push.
pub type Membership = Option<PeerMode>;

/// Decide what to do about one `(cast_id, peer)` pair.
pub fn decide(
    local: Option<&Side>,
    peer: Option<&Side>,
    baseline: Option<&Baseline>,
    mode: Membership,
) -> SyncAction {
    match (local, peer) {
        (None, None) => {
            if baseline.is_some() {
                SyncAction::ClearBaseline
            } else {
                SyncAction::NoOp
            }
        }
        (None, Some(peer)) => decide_local_absent(peer, baseline, mode),
        (Some(local), None) => decide_peer_absent(local, baseline, mode),
        (Some(local), Some(peer)) => {
            if local.digest == peer.digest {
                decide_converged(local, peer, mode)
            } else {
                decide_diverged(local, peer, baseline, mode)
            }
        }
    }
}

fn decide_local_absent(peer: &Side, baseline: Option<&Baseline>, mode: Membership) -> SyncAction {
    let Some(baseline) = baseline else {
        return SyncAction::Pull;
    };
    if peer.digest == baseline.digest {
        match mode {
            Some(PeerMode::Live) => SyncAction::DeletePeer,
            _ => SyncAction::ClearBaseline,
        }
    } else {
        SyncAction::Conflict(ConflictKind::Content)
    }
}

fn decide_peer_absent(local: &Side, baseline: Option<&Baseline>, mode: Membership) -> SyncAction {
    let Some(baseline) = baseline else {
        return match mode {
            Some(_) => SyncAction::Push,
            None => SyncAction::NoOp,
        };
    };
    if local.digest == baseline.digest {
        return SyncAction::DeleteLocal;
    }
    match mode {
        Some(PeerMode::Live) => SyncAction::Push,
        _ => SyncAction::NoOp,
    }
}

fn decide_converged(local: &Side, peer: &Side, mode: Membership) -> SyncAction {
    if local.relpath == peer.relpath {
        return SyncAction::NoOp;
    }
    match mode {
        Some(PeerMode::Watch) => SyncAction::RenameLocal {
            old: local.relpath.clone(),
            new: peer.relpath.clone(),
        },
        _ => SyncAction::RenamePeer {
            old: peer.relpath.clone(),
            new: local.relpath.clone(),
        },
    }
}

fn decide_diverged(
    local: &Side,
    peer: &Side,
    baseline: Option<&Baseline>,
    mode: Membership,
) -> SyncAction {
    let Some(baseline) = baseline else {
        return SyncAction::Conflict(ConflictKind::Content);
    };

    if local.relpath != peer.relpath
        && baseline.rel != local.relpath
        && baseline.rel != peer.relpath
    {
        return SyncAction::Conflict(ConflictKind::Rename);
    }

    if local.digest == baseline.digest {
        return SyncAction::Pull;
    }
    if peer.digest == baseline.digest {
        return match mode {
            Some(PeerMode::Live) => SyncAction::Push,
            _ => SyncAction::NoOp,
        };
    }
    SyncAction::Conflict(ConflictKind::Content)
}

/// Given a plain [`SyncAction::Push`] whose target path on the peer side is
/// already occupied by a file with a different `cast-id`, escalate to a
/// collision-safe copy. Used by the executor, which is the only component
/// that can probe the peer's current path occupancy.
pub fn escalate_push_collision(
    action: SyncAction,
    to_peer_path: PathBuf,
    local_cast_name: &str,
) -> SyncAction {
    match action {
        SyncAction::Push => SyncAction::SafePushCopy {
            to_peer_path,
            suffix: format!("(~from {local_cast_name})"),
        },
        other => other,
    }
}
