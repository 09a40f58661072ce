//! Action executor (C8)
//!
//! Applies the plan produced by the decision engine (C7) to disk, one
//! `(cast_id, peer)` pair at a time, in a stable order. Every write goes
//! through the front-matter codec's atomic-replace primitive; a failure on
//! one file never leaves that file half-written and never stops the rest
//! of the run.

use std::collections::BTreeSet;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::config::{CastConfig, CAST_DIR, LOCK_FILE};
use crate::decision::{self, Membership, Side, SyncAction};
use crate::digest::digest;
use crate::error::{ConflictKind, HsyncError, HsyncResult};
use crate::frontmatter::{self, PeerMode};
use crate::index::{self, FileRec, Index, LimitFile};
use crate::linkrewrite::{self, RenameMap};
use crate::registry::RegistryStore;
use crate::syncstate::{Baseline, SyncState};

/// How a conflict should be resolved when running interactively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    KeepLocal,
    KeepPeer,
    Cancel,
}

fn parse_choice(line: &str) -> Option<ConflictChoice> {
    match line.trim() {
        "keep_local" | "1" => Some(ConflictChoice::KeepLocal),
        "keep_peer" | "2" => Some(ConflictChoice::KeepPeer),
        "cancel" | "3" => Some(ConflictChoice::Cancel),
        _ => None,
    }
}

/// Options controlling one `hsync` invocation.
pub struct SyncOptions<'a> {
    /// Restrict the run to a single file.
    pub file: Option<LimitFile<'a>>,
    /// Restrict the run to these peer names; `None` means every declared peer.
    pub peers: Option<Vec<String>>,
    pub dry_run: bool,
    pub non_interactive: bool,
    pub cascade: bool,
}

impl Default for SyncOptions<'_> {
    fn default() -> Self {
        Self {
            file: None,
            peers: None,
            dry_run: false,
            non_interactive: true,
            cascade: false,
        }
    }
}

/// One applied (or planned, if `dry_run`) action against a `(cast_id, peer)`
/// pair.
#[derive(Debug, Clone)]
pub struct ExecutedAction {
    pub cast_id: String,
    pub peer: String,
    pub action: SyncAction,
}

/// A conflict surfaced by this run, not auto-resolved.
#[derive(Debug, Clone)]
pub struct ConflictRecord {
    pub cast_id: String,
    pub peer: String,
    pub kind: ConflictKind,
    pub local: Option<PathBuf>,
    pub peer_path: Option<PathBuf>,
}

/// The outcome of one `hsync`/`cbsync` invocation.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub actions: Vec<ExecutedAction>,
    pub conflicts: Vec<ConflictRecord>,
    pub peers_unavailable: Vec<(String, String)>,
    pub io_errors: Vec<(PathBuf, String)>,
}

impl SyncReport {
    /// Program-level exit status: 0 clean, 3 conflicts, 1 fatal-adjacent
    /// (peer unavailable or I/O errors present but run continued).
    pub fn exit_code(&self) -> i32 {
        if !self.conflicts.is_empty() {
            3
        } else if !self.peers_unavailable.is_empty() || !self.io_errors.is_empty() {
            1
        } else {
            0
        }
    }
}

/// Advisory lock at `<root>/.cast/lock`, held for the duration of a sync.
struct CastLock {
    file: std::fs::File,
}

impl CastLock {
    fn acquire(root: &Path) -> HsyncResult<Self> {
        let path = root.join(CAST_DIR).join(LOCK_FILE);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive().map_err(|_| HsyncError::Busy {
            root: root.to_path_buf(),
        })?;
        Ok(Self { file })
    }
}

impl Drop for CastLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Run `hsync` from `root` against every peer declared by local front
/// matter (or the subset named in `opts.peers`).
pub fn hsync<R: BufRead>(
    root: &Path,
    opts: SyncOptions<'_>,
    registry: &RegistryStore,
    input_stream: &mut R,
) -> HsyncResult<SyncReport> {
    let mut visited = BTreeSet::new();
    run_with_cascade(root, opts, registry, input_stream, &mut visited)
}

fn run_with_cascade<R: BufRead>(
    root: &Path,
    opts: SyncOptions<'_>,
    registry: &RegistryStore,
    input_stream: &mut R,
    visited: &mut BTreeSet<String>,
) -> HsyncResult<SyncReport> {
    let config = CastConfig::load(root)?;
    visited.insert(config.cast_id.clone());

    let _lock = if opts.dry_run {
        None
    } else {
        Some(CastLock::acquire(root)?)
    };

    let limit = opts.file;
    let local_index = index::build(root, &config.cast_location, !opts.dry_run, limit)?;

    let declared_peers = declared_peer_names(&local_index);
    let target_peers: Vec<String> = match &opts.peers {
        Some(names) => names.clone(),
        None => declared_peers.iter().cloned().collect(),
    };

    let mut report = SyncReport::default();
    let mut touched_peers: BTreeSet<String> = BTreeSet::new();

    let mut sorted_peers = target_peers.clone();
    sorted_peers.sort();

    for peer_name in sorted_peers {
        match sync_with_peer(
            root,
            &config,
            &local_index,
            &peer_name,
            opts.non_interactive,
            opts.dry_run,
            registry,
            input_stream,
            &mut report,
        ) {
            Ok(any_action) => {
                if any_action {
                    touched_peers.insert(peer_name);
                }
            }
            Err(HsyncError::PeerUnavailable { peer, reason }) => {
                report.peers_unavailable.push((peer, reason));
            }
            Err(e) => return Err(e),
        }
    }

    if opts.cascade && !opts.dry_run {
        for peer_name in touched_peers {
            if let Ok(peer_root) = registry.resolve_cast(&peer_name) {
                if let Ok(peer_config) = CastConfig::load(&peer_root) {
                    if visited.contains(&peer_config.cast_id) {
                        continue;
                    }
                    let child_opts = SyncOptions {
                        file: None,
                        peers: None,
                        dry_run: false,
                        non_interactive: opts.non_interactive,
                        cascade: true,
                    };
                    let child_report = run_with_cascade(
                        &peer_root,
                        child_opts,
                        registry,
                        input_stream,
                        visited,
                    )?;
                    report.actions.extend(child_report.actions);
                    report.conflicts.extend(child_report.conflicts);
                    report.peers_unavailable.extend(child_report.peers_unavailable);
                    report.io_errors.extend(child_report.io_errors);
                }
            }
        }
    }

    Ok(report)
}

fn declared_peer_names(index: &Index) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for rec in index.by_id.values() {
        for name in rec.peers.keys() {
            names.insert(name.clone());
        }
    }
    names
}

#[allow(clippy::too_many_arguments)]
fn sync_with_peer<R: BufRead>(
    root: &Path,
    config: &CastConfig,
    local_index: &Index,
    peer_name: &str,
    non_interactive: bool,
    dry_run: bool,
    registry: &RegistryStore,
    input_stream: &mut R,
    report: &mut SyncReport,
) -> HsyncResult<bool> {
    let peer_root = registry.resolve_cast(peer_name).map_err(|_| HsyncError::PeerUnavailable {
        peer: peer_name.to_string(),
        reason: "not registered".to_string(),
    })?;
    let peer_config = CastConfig::load(&peer_root).map_err(|_| HsyncError::PeerUnavailable {
        peer: peer_name.to_string(),
        reason: "missing .cast/config.yaml".to_string(),
    })?;

    let peer_index = index::build(&peer_root, &peer_config.cast_location, !dry_run, None)?;

    let mut local_state = SyncState::load(root)?;
    let mut peer_state = SyncState::load(&peer_root)?;

    let mut cast_ids: BTreeSet<String> = BTreeSet::new();
    for rec in local_index.by_id.values() {
        if rec.peers.contains_key(peer_name) {
            cast_ids.insert(rec.cast_id.clone());
        }
    }
    cast_ids.extend(peer_index.by_id.keys().cloned());
    cast_ids.extend(local_state.peers_for_any_with(peer_name));

    let mut any_action = false;

    for cast_id in cast_ids {
        let local_rec = local_index.get_by_id(&cast_id);
        let peer_rec = peer_index.get_by_id(&cast_id);
        let baseline = local_state.baseline(&cast_id, peer_name).cloned();
        let mode: Membership = local_rec.and_then(|r| r.peers.get(peer_name).copied());

        let local_side = local_rec.map(to_side);
        let peer_side = peer_rec.map(to_side);

        let mut action = decision::decide(
            local_side.as_ref(),
            peer_side.as_ref(),
            baseline.as_ref(),
            mode,
        );

        if action == SyncAction::Push {
            if let Some(local) = local_rec {
                if let Some(existing_id) = peer_index.by_path.get(&local.relpath) {
                    if existing_id != &cast_id {
                        action = decision::escalate_push_collision(
                            action,
                            local.relpath.clone(),
                            &config.cast_name,
                        );
                    }
                }
            }
        }

        if matches!(action, SyncAction::NoOp) {
            continue;
        }
        any_action = true;

        if dry_run {
            report.actions.push(ExecutedAction {
                cast_id: cast_id.clone(),
                peer: peer_name.to_string(),
                action,
            });
            continue;
        }

        apply_action(
            root,
            config,
            &peer_root,
            &peer_config,
            &cast_id,
            peer_name,
            local_rec,
            peer_rec,
            action.clone(),
            non_interactive,
            input_stream,
            &mut local_state,
            &mut peer_state,
            report,
        )?;

        report.actions.push(ExecutedAction {
            cast_id,
            peer: peer_name.to_string(),
            action,
        });
    }

    if !dry_run {
        local_state.save(root)?;
        peer_state.save(&peer_root)?;
    }

    Ok(any_action)
}

fn to_side(rec: &FileRec) -> Side {
    Side {
        relpath: rec.relpath.clone(),
        digest: rec.digest.clone(),
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_action<R: BufRead>(
    root: &Path,
    config: &CastConfig,
    peer_root: &Path,
    peer_config: &CastConfig,
    cast_id: &str,
    peer_name: &str,
    local_rec: Option<&FileRec>,
    peer_rec: Option<&FileRec>,
    action: SyncAction,
    non_interactive: bool,
    input_stream: &mut R,
    local_state: &mut SyncState,
    peer_state: &mut SyncState,
    report: &mut SyncReport,
) -> HsyncResult<()> {
    let now = chrono::Utc::now().to_rfc3339();

    match action {
        SyncAction::NoOp => {}
        SyncAction::ClearBaseline => {
            local_state.clear_baseline(cast_id, peer_name);
            peer_state.clear_baseline(cast_id, &config.cast_name);
        }
        SyncAction::Push => {
            let local = local_rec.expect("push requires local file");
            let dest = peer_config.cast_location_path(peer_root).join(&local.relpath);
            write_file(&dest, &local.front_matter, &local.body)?;
            set_agreement(
                local_state,
                peer_state,
                cast_id,
                peer_name,
                &config.cast_name,
                digest(&local.front_matter, &local.body),
                local.relpath.clone(),
                local.relpath.clone(),
                &now,
            );
        }
        SyncAction::Pull => {
            let peer = peer_rec.expect("pull requires peer file");
            let dest = config.cast_location_path(root).join(&peer.relpath);
            write_file(&dest, &peer.front_matter, &peer.body)?;
            set_agreement(
                local_state,
                peer_state,
                cast_id,
                peer_name,
                &config.cast_name,
                digest(&peer.front_matter, &peer.body),
                peer.relpath.clone(),
                peer.relpath.clone(),
                &now,
            );
        }
        SyncAction::RenamePeer { old, new } => {
            let peer_base = peer_config.cast_location_path(peer_root);
            rename_file(&peer_base, &old, &new)?;
            let mut renames = RenameMap::new();
            let old_s = old.to_string_lossy().to_string();
            let new_s = new.to_string_lossy().to_string();
            renames.insert(old_s.as_str(), new_s.as_str());
            linkrewrite::rewrite_tree(&peer_base, &renames)?;
            let d = peer_rec.map(|r| r.digest.clone()).unwrap_or_else(|| {
                local_rec.map(|r| r.digest.clone()).unwrap()
            });
            set_agreement(
                local_state, peer_state, cast_id, peer_name, &config.cast_name, d, new.clone(), new, &now,
            );
        }
        SyncAction::RenameLocal { old, new } => {
            let local_base = config.cast_location_path(root);
            rename_file(&local_base, &old, &new)?;
            let mut renames = RenameMap::new();
            let old_s = old.to_string_lossy().to_string();
            let new_s = new.to_string_lossy().to_string();
            renames.insert(old_s.as_str(), new_s.as_str());
            linkrewrite::rewrite_tree(&local_base, &renames)?;
            let d = local_rec.map(|r| r.digest.clone()).unwrap_or_else(|| {
                peer_rec.map(|r| r.digest.clone()).unwrap()
            });
            set_agreement(
                local_state, peer_state, cast_id, peer_name, &config.cast_name, d, new.clone(), new, &now,
            );
        }
        SyncAction::SafePushCopy { to_peer_path, suffix } => {
            let local = local_rec.expect("safe push copy requires local file");
            let peer_base = peer_config.cast_location_path(peer_root);
            let dest = unique_suffixed_path(&peer_base, &to_peer_path, &suffix);
            write_file(&peer_base.join(&dest), &local.front_matter, &local.body)?;
            set_agreement(
                local_state,
                peer_state,
                cast_id,
                peer_name,
                &config.cast_name,
                digest(&local.front_matter, &local.body),
                local.relpath.clone(),
                dest,
                &now,
            );
        }
        SyncAction::DeletePeer => {
            let peer = peer_rec.expect("delete peer requires peer file");
            let path = peer_config.cast_location_path(peer_root).join(&peer.relpath);
            remove_file(&path)?;
            local_state.clear_baseline(cast_id, peer_name);
            peer_state.clear_baseline(cast_id, &config.cast_name);
        }
        SyncAction::DeleteLocal => {
            let local = local_rec.expect("delete local requires local file");
            let path = config.cast_location_path(root).join(&local.relpath);
            remove_file(&path)?;
            local_state.clear_baseline(cast_id, peer_name);
            peer_state.clear_baseline(cast_id, &config.cast_name);
        }
        SyncAction::Conflict(kind) => {
            resolve_conflict(
                root,
                config,
                peer_root,
                peer_config,
                cast_id,
                peer_name,
                local_rec,
                peer_rec,
                kind,
                non_interactive,
                input_stream,
                local_state,
                peer_state,
                report,
                &now,
            )?;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn resolve_conflict<R: BufRead>(
    root: &Path,
    config: &CastConfig,
    peer_root: &Path,
    peer_config: &CastConfig,
    cast_id: &str,
    peer_name: &str,
    local_rec: Option<&FileRec>,
    peer_rec: Option<&FileRec>,
    kind: ConflictKind,
    non_interactive: bool,
    input_stream: &mut R,
    local_state: &mut SyncState,
    peer_state: &mut SyncState,
    report: &mut SyncReport,
    now: &str,
) -> HsyncResult<()> {
    if non_interactive {
        report.conflicts.push(ConflictRecord {
            cast_id: cast_id.to_string(),
            peer: peer_name.to_string(),
            kind,
            local: local_rec.map(|r| r.relpath.clone()),
            peer_path: peer_rec.map(|r| r.relpath.clone()),
        });
        return Ok(());
    }

    let mut line = String::new();
    let choice = loop {
        line.clear();
        if input_stream.read_line(&mut line)? == 0 {
            break ConflictChoice::Cancel;
        }
        if let Some(choice) = parse_choice(&line) {
            break choice;
        }
    };

    match choice {
        ConflictChoice::Cancel => {
            report.conflicts.push(ConflictRecord {
                cast_id: cast_id.to_string(),
                peer: peer_name.to_string(),
                kind,
                local: local_rec.map(|r| r.relpath.clone()),
                peer_path: peer_rec.map(|r| r.relpath.clone()),
            });
        }
        ConflictChoice::KeepLocal => {
            if let Some(local) = local_rec {
                let dest = peer_config
                    .cast_location_path(peer_root)
                    .join(&local.relpath);
                write_file(&dest, &local.front_matter, &local.body)?;
                set_agreement(
                    local_state,
                    peer_state,
                    cast_id,
                    peer_name,
                    &config.cast_name,
                    digest(&local.front_matter, &local.body),
                    local.relpath.clone(),
                    local.relpath.clone(),
                    now,
                );
            }
        }
        ConflictChoice::KeepPeer => {
            if let Some(peer) = peer_rec {
                let dest = config.cast_location_path(root).join(&peer.relpath);
                if let Some(local) = local_rec {
                    if local.relpath != peer.relpath {
                        let local_base = config.cast_location_path(root);
                        rename_file(&local_base, &local.relpath, &peer.relpath)?;
                        let mut renames = RenameMap::new();
                        let old_s = local.relpath.to_string_lossy().to_string();
                        let new_s = peer.relpath.to_string_lossy().to_string();
                        renames.insert(old_s.as_str(), new_s.as_str());
                        linkrewrite::rewrite_tree(&local_base, &renames)?;
                    }
                }
                write_file(&dest, &peer.front_matter, &peer.body)?;
                set_agreement(
                    local_state,
                    peer_state,
                    cast_id,
                    peer_name,
                    &config.cast_name,
                    digest(&peer.front_matter, &peer.body),
                    peer.relpath.clone(),
                    peer.relpath.clone(),
                    now,
                );
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn set_agreement(
    local_state: &mut SyncState,
    peer_state: &mut SyncState,
    cast_id: &str,
    peer_name: &str,
    local_cast_name: &str,
    d: crate::digest::ContentDigest,
    rel: PathBuf,
    peer_rel: PathBuf,
    now: &str,
) {
    local_state.set_baseline(
        cast_id,
        peer_name,
        Baseline::new(d.clone(), rel.clone(), peer_rel.clone(), now.to_string()),
    );
    peer_state.set_baseline(
        cast_id,
        local_cast_name,
        Baseline::new(d, peer_rel, rel, now.to_string()),
    );
}

fn write_file(path: &Path, fm: &crate::frontmatter::FrontMatter, body: &str) -> HsyncResult<()> {
    frontmatter::write(path, fm, body)
}

fn rename_file(base: &Path, old: &Path, new: &Path) -> HsyncResult<()> {
    let old_path = base.join(old);
    let new_path = base.join(new);
    if let Some(dir) = new_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::rename(&old_path, &new_path)?;
    Ok(())
}

fn remove_file(path: &Path) -> HsyncResult<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

fn unique_suffixed_path(base: &Path, target: &Path, suffix: &str) -> PathBuf {
    let stem = target.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = target.extension().and_then(|s| s.to_str());
    let parent = target.parent().unwrap_or_else(|| Path::new(""));

    let mut candidate = render_candidate(parent, stem, suffix, ext, None);
    let mut n = 2;
    while base.join(&candidate).exists() {
        candidate = render_candidate(parent, stem, suffix, ext, Some(n));
        n += 1;
    }
    candidate
}

fn render_candidate(
    parent: &Path,
    stem: &str,
    suffix: &str,
    ext: Option<&str>,
    n: Option<u32>,
) -> PathBuf {
    let mut name = format!("{stem} {suffix}");
    if let Some(n) = n {
        name.push_str(&format!(" {n}"));
    }
    if let Some(ext) = ext {
        name.push('.');
        name.push_str(ext);
    }
    parent.join(name)
}
