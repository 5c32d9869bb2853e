use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use common::DeviceFile;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

const PLAYLIST_EXTENSIONS: &[&str] = &["m3u", "m3u8"];

/// Playlists are a small working set; audio cardinality can be large and
/// must not block the walk, so that side is unbounded.
const PLAYLIST_BUFFER: usize = 32;

#[derive(Clone, Debug)]
pub struct ExploreRules {
    pub exclude: Vec<PathBuf>,
    pub exclude_hidden: bool,
}

impl Default for ExploreRules {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            exclude_hidden: true,
        }
    }
}

/// Partitioned candidate streams. Both sequences are finite; the senders
/// drop when the tree walk completes, closing the channels.
#[derive(Debug)]
pub struct ExploredFiles {
    pub audios: mpsc::UnboundedReceiver<DeviceFile>,
    pub playlists: mpsc::Receiver<DeviceFile>,
}

#[derive(Debug)]
pub enum ExploreError {
    NoAccessibleRoots,
}

impl std::fmt::Display for ExploreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExploreError::NoAccessibleRoots => write!(f, "no accessible root locations"),
        }
    }
}

impl std::error::Error for ExploreError {}

pub struct Explorer {
    rules: ExploreRules,
}

impl Explorer {
    pub fn new(rules: ExploreRules) -> Self {
        Self { rules }
    }

    /// Starts a walk over the given roots on a blocking task and returns
    /// the candidate streams immediately. Unreadable roots are skipped
    /// with a warning; only zero accessible roots is fatal.
    pub fn explore(
        &self,
        roots: &[PathBuf],
        cancel: CancellationToken,
    ) -> Result<ExploredFiles, ExploreError> {
        let mut accessible = Vec::new();
        for root in roots {
            match std::fs::canonicalize(root) {
                Ok(path) if path.is_dir() => accessible.push(path),
                Ok(path) => warn!("Skipping non-directory root {:?}", path),
                Err(err) => warn!("Skipping inaccessible root {:?}: {}", root, err),
            }
        }
        if accessible.is_empty() {
            return Err(ExploreError::NoAccessibleRoots);
        }

        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (playlist_tx, playlist_rx) = mpsc::channel(PLAYLIST_BUFFER);
        let rules = self.rules.clone();
        tokio::task::spawn_blocking(move || {
            walk_roots(&accessible, &rules, audio_tx, playlist_tx, cancel)
        });

        Ok(ExploredFiles {
            audios: audio_rx,
            playlists: playlist_rx,
        })
    }
}

fn walk_roots(
    roots: &[PathBuf],
    rules: &ExploreRules,
    audio_tx: mpsc::UnboundedSender<DeviceFile>,
    playlist_tx: mpsc::Sender<DeviceFile>,
    cancel: CancellationToken,
) {
    let mut seen: HashSet<PathBuf> = HashSet::new();

    for root in roots {
        let walker = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| allowed(entry, rules));

        for entry in walker {
            if cancel.is_cancelled() {
                return;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    // A subtree failing to read must not abort its siblings.
                    warn!("Failed to read subtree under {:?}: {}", root, err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = match std::fs::canonicalize(entry.path()) {
                Ok(path) => path,
                Err(err) => {
                    debug!("File {:?} vanished mid-walk: {}", entry.path(), err);
                    continue;
                }
            };
            if !seen.insert(path.clone()) {
                continue;
            }

            let kind = match classify(&path) {
                Some(kind) => kind,
                None => continue,
            };
            let file = match observe(path) {
                Some(file) => file,
                None => continue,
            };
            let delivered = match kind {
                CandidateKind::Audio => audio_tx.send(file).is_ok(),
                CandidateKind::Playlist => playlist_tx.blocking_send(file).is_ok(),
            };
            if !delivered {
                // Receiver dropped; the run is over.
                return;
            }
        }
    }
}

enum CandidateKind {
    Audio,
    Playlist,
}

fn classify(path: &Path) -> Option<CandidateKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    // m3u guesses as audio/x-mpegurl, so the playlist check comes first.
    if PLAYLIST_EXTENSIONS.contains(&ext.as_str()) {
        return Some(CandidateKind::Playlist);
    }
    let mime = mime_guess::from_path(path).first()?;
    if mime.type_() == mime_guess::mime::AUDIO {
        return Some(CandidateKind::Audio);
    }
    None
}

fn observe(path: PathBuf) -> Option<DeviceFile> {
    let metadata = match std::fs::metadata(&path) {
        Ok(metadata) => metadata,
        Err(err) => {
            debug!("Failed to stat {:?}: {}", path, err);
            return None;
        }
    };
    let modified_secs = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
        .unwrap_or(0);
    Some(DeviceFile {
        path,
        size: metadata.len(),
        modified_secs,
    })
}

fn allowed(entry: &DirEntry, rules: &ExploreRules) -> bool {
    if rules.exclude_hidden {
        let hidden = entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false);
        if hidden && entry.depth() > 0 {
            return false;
        }
    }
    !rules.exclude.iter().any(|ex| entry.path().starts_with(ex))
}
