// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! OS filesystem notifications as [`FileEvent`]s

use crate::types::{FileEvent, FileEventKind};
use anyhow::{Context, Result};
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 1024;

/// Keeps the OS watch alive; dropping it stops the event stream
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl FsWatcher {
    /// Watched root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Watch `root` recursively
///
/// Events arrive on the returned receiver from the notify thread. The
/// receiver closes when the [`FsWatcher`] is dropped.
pub fn watch(root: &Path) -> Result<(FsWatcher, mpsc::Receiver<FileEvent>)> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for file_event in translate(&event) {
                if tx.blocking_send(file_event).is_err() {
                    return;
                }
            }
        }
        Err(e) => warn!(error = %e, "filesystem watch error"),
    })
    .context("failed to create filesystem watcher")?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .with_context(|| format!("failed to watch {}", root.display()))?;
    debug!(root = %root.display(), "watching");

    Ok((
        FsWatcher {
            _watcher: watcher,
            root: root.to_path_buf(),
        },
        rx,
    ))
}

/// Map one notify event onto zero or more file events
///
/// Metadata-only changes and directory create/remove are dropped. A rename
/// becomes a removal of the old path and a creation of the new one.
#[must_use]
pub fn translate(event: &Event) -> Vec<FileEvent> {
    let all = |kind: FileEventKind| -> Vec<FileEvent> {
        event.paths.iter().map(|p| FileEvent::new(p.clone(), kind)).collect()
    };

    match event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => Vec::new(),
        EventKind::Create(_) => all(FileEventKind::Created),
        EventKind::Remove(_) => all(FileEventKind::Removed),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(FileEventKind::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(FileEventKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to, ..] => vec![
                FileEvent::new(from.clone(), FileEventKind::Removed),
                FileEvent::new(to.clone(), FileEventKind::Created),
            ],
            _ => all(FileEventKind::Modified),
        },
        EventKind::Modify(_) => all(FileEventKind::Modified),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => all(FileEventKind::Saved),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}
