use std::path::PathBuf;
use std::sync::Arc;

use cache::TagCache;
use common::DeviceFile;
use explore::{ExploreError, ExploreRules, Explorer};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::interpret::Interpretation;
use crate::model::{model, AudioFile, PlaylistFile};
use crate::playlist::read_playlist;
use crate::Library;

const DEFAULT_WORKERS: usize = 8;
const PLAYLIST_BUFFER: usize = 16;

/// Progress of one indexing run. The counted phase reports how many
/// candidates were found and how many finished extraction; the phases
/// around it have no meaningful counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexingProgress {
    Indeterminate,
    Songs { loaded: usize, explored: usize },
}

#[derive(Debug)]
pub enum IndexError {
    Explore(ExploreError),
    Task(JoinError),
    Cancelled,
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::Explore(err) => write!(f, "exploration failed: {}", err),
            IndexError::Task(err) => write!(f, "pipeline stage failed: {}", err),
            IndexError::Cancelled => write!(f, "indexing cancelled"),
        }
    }
}

impl std::error::Error for IndexError {}

impl From<ExploreError> for IndexError {
    fn from(err: ExploreError) -> Self {
        IndexError::Explore(err)
    }
}

impl From<JoinError> for IndexError {
    fn from(err: JoinError) -> Self {
        IndexError::Task(err)
    }
}

enum Tick {
    Explored,
    Loaded,
}

/// Runs the whole pipeline: explore, extract through the cache, parse
/// playlists, model. One call, one immutable snapshot.
pub struct Indexer {
    cache: TagCache,
    workers: usize,
    exclude: Vec<PathBuf>,
}

impl Indexer {
    pub fn new(cache: TagCache) -> Self {
        Self {
            cache,
            workers: DEFAULT_WORKERS,
            exclude: Vec::new(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Directories to leave out of the walk entirely.
    pub fn with_excluded(mut self, exclude: Vec<PathBuf>) -> Self {
        self.exclude = exclude;
        self
    }

    pub async fn run<F>(
        &self,
        roots: &[PathBuf],
        interpretation: &Interpretation,
        cancel: CancellationToken,
        mut on_progress: F,
    ) -> Result<Library, IndexError>
    where
        F: FnMut(IndexingProgress) + Send,
    {
        on_progress(IndexingProgress::Indeterminate);

        let rules = ExploreRules {
            exclude: self.exclude.clone(),
            exclude_hidden: interpretation.exclude_hidden,
        };
        let explored = Explorer::new(rules).explore(roots, cancel.clone())?;

        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (playlist_tx, playlist_rx) = mpsc::channel(PLAYLIST_BUFFER);
        let (tick_tx, mut tick_rx) = mpsc::unbounded_channel();

        let extraction = tokio::spawn(extraction_stage(
            explored.audios,
            self.cache.clone(),
            self.workers,
            audio_tx,
            tick_tx,
            cancel.clone(),
        ));
        let playlists = tokio::spawn(playlist_stage(
            explored.playlists,
            playlist_tx,
            cancel.clone(),
        ));
        let modeler = {
            let interpretation = interpretation.clone();
            tokio::spawn(async move { model(audio_rx, playlist_rx, &interpretation).await })
        };

        let mut loaded = 0usize;
        let mut found = 0usize;
        on_progress(IndexingProgress::Songs {
            loaded: 0,
            explored: 0,
        });
        loop {
            let tick = tokio::select! {
                _ = cancel.cancelled() => break,
                tick = tick_rx.recv() => match tick {
                    Some(tick) => tick,
                    None => break,
                },
            };
            match tick {
                Tick::Explored => found += 1,
                Tick::Loaded => loaded += 1,
            }
            on_progress(IndexingProgress::Songs {
                loaded,
                explored: found,
            });
        }
        // Counting is over; modeling has no per-song granularity.
        on_progress(IndexingProgress::Indeterminate);

        if cancel.is_cancelled() {
            // A worker stuck in file I/O must not hold up teardown; the
            // stages are abandoned, not joined. Redb commits are atomic, so
            // an abandoned store leaves the cache consistent.
            extraction.abort();
            playlists.abort();
            modeler.abort();
            return Err(IndexError::Cancelled);
        }

        extraction.await?;
        playlists.await?;
        let library = modeler.await?;

        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }
        let stats = library.stats();
        info!(
            "Indexed {} songs into {} albums, {} artists, {} genres, {} playlists",
            stats.songs, stats.albums, stats.artists, stats.genres, stats.playlists
        );
        Ok(library)
    }
}

/// Fans candidates out to a bounded pool of extraction tasks. Emits an
/// Explored tick when a candidate is taken up and a Loaded tick when its
/// extraction settles, so loaded can never pass explored.
async fn extraction_stage(
    mut candidates: mpsc::UnboundedReceiver<DeviceFile>,
    cache: TagCache,
    workers: usize,
    audio_tx: mpsc::UnboundedSender<AudioFile>,
    tick_tx: mpsc::UnboundedSender<Tick>,
    cancel: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut pool = JoinSet::new();
    loop {
        let file = tokio::select! {
            _ = cancel.cancelled() => break,
            candidate = candidates.recv() => match candidate {
                Some(file) => file,
                None => break,
            },
        };
        let _ = tick_tx.send(Tick::Explored);

        // Stuck workers hold their permits, so this wait honors
        // cancellation too.
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let cache = cache.clone();
        let audio_tx = audio_tx.clone();
        let tick_tx = tick_tx.clone();
        let cancel = cancel.clone();
        pool.spawn(async move {
            let _permit = permit;
            if !cancel.is_cancelled() {
                if let Some(audio) = load_audio(&cache, file).await {
                    let _ = audio_tx.send(audio);
                }
            }
            let _ = tick_tx.send(Tick::Loaded);
        });
    }
    if cancel.is_cancelled() {
        // In-flight workers may be stuck in file I/O; leave them behind.
        pool.detach_all();
        return;
    }
    while pool.join_next().await.is_some() {}
}

/// Cache hit or live extraction. None means the file is skipped; a broken
/// file never aborts the run.
async fn load_audio(cache: &TagCache, file: DeviceFile) -> Option<AudioFile> {
    let lookup_cache = cache.clone();
    let lookup_file = file.clone();
    let hit =
        tokio::task::spawn_blocking(move || lookup_cache.lookup(&lookup_file)).await;
    if let Ok(Some(entry)) = hit {
        debug!("Cache hit for {:?}", file.path);
        return Some(AudioFile {
            file,
            tags: entry.tags,
            properties: entry.properties,
        });
    }

    let store_cache = cache.clone();
    let target = file.clone();
    let extracted = tokio::task::spawn_blocking(move || {
        let extracted = metadata::extract(&target.path)?;
        let tags = extracted.tags.clone().unwrap_or_default();
        if let Err(err) = store_cache.store(&target, &tags, &extracted.properties) {
            warn!("Failed to cache tags for {:?}: {}", target.path, err);
        }
        Ok::<_, metadata::MetadataError>(extracted)
    })
    .await;

    match extracted {
        Ok(Ok(extracted)) => Some(AudioFile {
            file,
            tags: extracted.tags.unwrap_or_default(),
            properties: extracted.properties,
        }),
        Ok(Err(err)) => {
            warn!("Skipping unreadable file {:?}: {}", file.path, err);
            None
        }
        Err(err) => {
            warn!("Extraction task failed for {:?}: {}", file.path, err);
            None
        }
    }
}

async fn playlist_stage(
    mut candidates: mpsc::Receiver<DeviceFile>,
    out: mpsc::Sender<PlaylistFile>,
    cancel: CancellationToken,
) {
    loop {
        let file = tokio::select! {
            _ = cancel.cancelled() => break,
            candidate = candidates.recv() => match candidate {
                Some(file) => file,
                None => break,
            },
        };
        match read_playlist(&file).await {
            Ok(parsed) => {
                if out.send(parsed).await.is_err() {
                    break;
                }
            }
            Err(err) => warn!("Skipping unreadable playlist {:?}: {}", file.path, err),
        }
    }
}
