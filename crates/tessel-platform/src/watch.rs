// SPDX-License-Identifier: CEPL-1.0
use std::ffi::OsString;
use std::path::Path;
use std::sync::mpsc::{self, Receiver};

use anyhow::{Context, Result};
use notify::{recommended_watcher, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

/// Watches one directory and reports changes to a fixed set of file names.
pub struct ShaderWatch {
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    names: Vec<OsString>,
}

impl ShaderWatch {
    pub fn new(dir: &Path, names: &[&Path]) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .context("create file watcher")?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", dir.display()))?;

        let names = names
            .iter()
            .filter_map(|p| p.file_name().map(OsString::from))
            .collect();
        Ok(Self {
            _watcher: watcher,
            rx,
            names,
        })
    }

    /// Drain queued events. True if any touched a watched file.
    pub fn poll(&self) -> bool {
        let mut hit = false;
        for res in self.rx.try_iter() {
            match res {
                Ok(event) if matches_watched(&event, &self.names) => {
                    debug!("shader change: {:?}", event.paths);
                    hit = true;
                }
                Ok(_) => {}
                Err(e) => warn!("file watch: {e}"),
            }
        }
        hit
    }
}

/// Content-changing events (create, modify) on a path whose file name is in
/// `names`.
pub fn matches_watched(event: &Event, names: &[OsString]) -> bool {
    (event.kind.is_create() || event.kind.is_modify())
        && event
            .paths
            .iter()
            .filter_map(|p| p.file_name())
            .any(|name| names.iter().any(|n| n == name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, EventKind, ModifyKind, RemoveKind};
    use std::path::PathBuf;

    fn names() -> Vec<OsString> {
        vec!["quad.vert".into(), "quad.frag".into()]
    }

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn writes_to_watched_shaders_match() {
        let modify = EventKind::Modify(ModifyKind::Data(DataChange::Content));
        assert!(matches_watched(&event(modify, "/proj/shaders/quad.vert"), &names()));
        assert!(matches_watched(
            &event(EventKind::Create(CreateKind::File), "shaders/quad.frag"),
            &names()
        ));
    }

    #[test]
    fn other_files_and_kinds_are_ignored() {
        let modify = EventKind::Modify(ModifyKind::Data(DataChange::Content));
        assert!(!matches_watched(&event(modify, "/proj/shaders/common.glsl"), &names()));
        assert!(!matches_watched(&event(modify, "/proj/shaders/quad.vert.swp"), &names()));
        assert!(!matches_watched(
            &event(EventKind::Remove(RemoveKind::File), "/proj/shaders/quad.vert"),
            &names()
        ));
        assert!(!matches_watched(
            &event(EventKind::Access(AccessKind::Any), "/proj/shaders/quad.frag"),
            &names()
        ));
    }
}
