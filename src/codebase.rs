//! Codebase synchronizer (C9)
//!
//! Same merge machinery as [`crate::executor`], fixed to a two-party
//! topology: the local cast and one codebase. The codebase root has no
//! `.cast/config.yaml` of its own — its note tree lives at a hard-wired
//! subpath (`docs/cast/` by convention) and it is always treated as a
//! `live` peer. Only files whose `cast-codebases` names the target
//! codebase are in scope.

use std::path::{Path, PathBuf};

use crate::config::{CastConfig, CODEBASE_CAST_SUBDIR};
use crate::decision::{self, Side, SyncAction};
use crate::digest::digest;
use crate::error::{HsyncError, HsyncResult};
use crate::frontmatter::{self, PeerMode};
use crate::index::{self, FileRec};
use crate::linkrewrite::{self, RenameMap};
use crate::registry::RegistryStore;
use crate::syncstate::{Baseline, SyncState};

use crate::executor::{ConflictRecord, ExecutedAction, SyncReport};

/// Options controlling a `cbsync` invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CbsyncOptions {
    pub non_interactive: bool,
    pub dry_run: bool,
}

/// Sync `root`'s cast against the codebase named `codebase_name`.
pub fn cbsync(
    root: &Path,
    codebase_name: &str,
    opts: CbsyncOptions,
    registry: &RegistryStore,
) -> HsyncResult<SyncReport> {
    let config = CastConfig::load(root)?;
    let codebase_root = registry
        .resolve_codebase(codebase_name)
        .map_err(|_| HsyncError::PeerUnavailable {
            peer: codebase_name.to_string(),
            reason: "not registered".to_string(),
        })?;

    let local_index = index::build(root, &config.cast_location, !opts.dry_run, None)?;
    let codebase_index = index::build(&codebase_root, CODEBASE_CAST_SUBDIR, !opts.dry_run, None)?;

    let mut local_state = SyncState::load(root)?;
    let mut codebase_state = SyncState::load(&codebase_root)?;

    let mut cast_ids: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for rec in local_index.by_id.values() {
        if rec.codebases.iter().any(|c| c == codebase_name) {
            cast_ids.insert(rec.cast_id.clone());
        }
    }
    cast_ids.extend(codebase_index.by_id.keys().cloned());
    cast_ids.extend(local_state.peers_for_any_with(codebase_name));

    let mut report = SyncReport::default();

    for cast_id in cast_ids {
        let local_rec = local_index.get_by_id(&cast_id);
        let codebase_rec = codebase_index.get_by_id(&cast_id);
        let in_scope = local_rec
            .map(|r| r.codebases.iter().any(|c| c == codebase_name))
            .unwrap_or(true);
        if !in_scope {
            continue;
        }

        let baseline = local_state.baseline(&cast_id, codebase_name).cloned();
        let local_side = local_rec.map(to_side);
        let codebase_side = codebase_rec.map(to_side);

        let action = decision::decide(
            local_side.as_ref(),
            codebase_side.as_ref(),
            baseline.as_ref(),
            Some(PeerMode::Live),
        );

        if matches!(action, SyncAction::NoOp) {
            continue;
        }

        if opts.dry_run {
            report.actions.push(ExecutedAction {
                cast_id: cast_id.clone(),
                peer: codebase_name.to_string(),
                action,
            });
            continue;
        }

        apply_codebase_action(
            root,
            &config,
            &codebase_root,
            &cast_id,
            codebase_name,
            local_rec,
            codebase_rec,
            action.clone(),
            &mut local_state,
            &mut codebase_state,
            &mut report,
        )?;

        report.actions.push(ExecutedAction {
            cast_id,
            peer: codebase_name.to_string(),
            action,
        });
    }

    if !opts.dry_run {
        local_state.save(root)?;
        codebase_state.save(&codebase_root)?;
    }

    Ok(report)
}

fn to_side(rec: &FileRec) -> Side {
    Side {
        relpath: rec.relpath.clone(),
        digest: rec.digest.clone(),
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_codebase_action(
    root: &Path,
    config: &CastConfig,
    codebase_root: &Path,
    cast_id: &str,
    codebase_name: &str,
    local_rec: Option<&FileRec>,
    codebase_rec: Option<&FileRec>,
    action: SyncAction,
    local_state: &mut SyncState,
    codebase_state: &mut SyncState,
    report: &mut SyncReport,
) -> HsyncResult<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let codebase_base = codebase_root.join(CODEBASE_CAST_SUBDIR);
    let local_base = config.cast_location_path(root);

    match action {
        SyncAction::NoOp => {}
        SyncAction::ClearBaseline => {
            local_state.clear_baseline(cast_id, codebase_name);
            codebase_state.clear_baseline(cast_id, &config.cast_name);
        }
        SyncAction::Push => {
            let local = local_rec.expect("push requires local file");
            let dest = codebase_base.join(&local.relpath);
            frontmatter::write(&dest, &local.front_matter, &local.body)?;
            agree(
                local_state,
                codebase_state,
                cast_id,
                codebase_name,
                &config.cast_name,
                digest(&local.front_matter, &local.body),
                local.relpath.clone(),
                local.relpath.clone(),
                &now,
            );
        }
        SyncAction::Pull => {
            let remote = codebase_rec.expect("pull requires codebase file");
            let dest = local_base.join(&remote.relpath);
            frontmatter::write(&dest, &remote.front_matter, &remote.body)?;
            agree(
                local_state,
                codebase_state,
                cast_id,
                codebase_name,
                &config.cast_name,
                digest(&remote.front_matter, &remote.body),
                remote.relpath.clone(),
                remote.relpath.clone(),
                &now,
            );
        }
        SyncAction::RenamePeer { old, new } => {
            rename(&codebase_base, &old, &new)?;
            rewrite_links(&codebase_base, &old, &new)?;
            let d = codebase_rec
                .map(|r| r.digest.clone())
                .or_else(|| local_rec.map(|r| r.digest.clone()))
                .expect("rename requires a known digest");
            agree(
                local_state, codebase_state, cast_id, codebase_name, &config.cast_name, d,
                new.clone(), new, &now,
            );
        }
        SyncAction::RenameLocal { old, new } => {
            rename(&local_base, &old, &new)?;
            rewrite_links(&local_base, &old, &new)?;
            let d = local_rec
                .map(|r| r.digest.clone())
                .or_else(|| codebase_rec.map(|r| r.digest.clone()))
                .expect("rename requires a known digest");
            agree(
                local_state, codebase_state, cast_id, codebase_name, &config.cast_name, d,
                new.clone(), new, &now,
            );
        }
        SyncAction::SafePushCopy { to_peer_path, suffix } => {
            let local = local_rec.expect("safe push copy requires local file");
            let dest = unique_suffixed(&codebase_base, &to_peer_path, &suffix);
            frontmatter::write(&codebase_base.join(&dest), &local.front_matter, &local.body)?;
            agree(
                local_state,
                codebase_state,
                cast_id,
                codebase_name,
                &config.cast_name,
                digest(&local.front_matter, &local.body),
                local.relpath.clone(),
                dest,
                &now,
            );
        }
        SyncAction::DeletePeer => {
            let remote = codebase_rec.expect("delete requires codebase file");
            let path = codebase_base.join(&remote.relpath);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            local_state.clear_baseline(cast_id, codebase_name);
            codebase_state.clear_baseline(cast_id, &config.cast_name);
        }
        SyncAction::DeleteLocal => {
            let local = local_rec.expect("delete requires local file");
            let path = local_base.join(&local.relpath);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            local_state.clear_baseline(cast_id, codebase_name);
            codebase_state.clear_baseline(cast_id, &config.cast_name);
        }
        SyncAction::Conflict(kind) => {
            report.conflicts.push(ConflictRecord {
                cast_id: cast_id.to_string(),
                peer: codebase_name.to_string(),
                kind,
                local: local_rec.map(|r| r.relpath.clone()),
                peer_path: codebase_rec.map(|r| r.relpath.clone()),
            });
        }
    }
    Ok(())
}

fn rename(base: &Path, old: &Path, new: &Path) -> HsyncResult<()> {
    let old_path = base.join(old);
    let new_path = base.join(new);
    if let Some(dir) = new_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::rename(&old_path, &new_path)?;
    Ok(())
}

fn rewrite_links(base: &Path, old: &Path, new: &Path) -> HsyncResult<()> {
    let mut renames = RenameMap::new();
    let old_s = old.to_string_lossy().to_string();
    let new_s = new.to_string_lossy().to_string();
    renames.insert(old_s.as_str(), new_s.as_str());
    linkrewrite::rewrite_tree(base, &renames)?;
    Ok(())
}

fn unique_suffixed(base: &Path, target: &Path, suffix: &str) -> PathBuf {
    let stem = target.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = target.extension().and_then(|s| s.to_str());
    let parent = target.parent().unwrap_or_else(|| Path::new(""));

    let render = |n: Option<u32>| {
        let mut name = format!("{stem} {suffix}");
        if let Some(n) = n {
            name.push_str(&format!(" {n}"));
        }
        if let Some(ext) = ext {
            name.push('.');
            name.push_str(ext);
        }
        parent.join(name)
    };

    let mut candidate = render(None);
    let mut n = 2;
    while base.join(&candidate).exists() {
        candidate = render(Some(n));
        n += 1;
    }
    candidate
}

#[allow(clippy::too_many_arguments)]
fn agree(
    local_state: &mut SyncState,
    codebase_state: &mut SyncState,
    cast_id: &str,
    codebase_name: &str,
    local_cast_name: &str,
    d: crate::digest::ContentDigest,
    rel: PathBuf,
    peer_rel: PathBuf,
    now: &str,
) {
    local_state.set_baseline(
        cast_id,
        codebase_name,
        Baseline::new(d.clone(), rel.clone(), peer_rel.clone(), now.to_string()),
    );
    codebase_state.set_baseline(
        cast_id,
        local_cast_name,
        Baseline::new(d, peer_rel, rel, now.to_string()),
    );
}
