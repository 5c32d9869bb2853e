use std::env;
use std::path::PathBuf;

use cache::TagCache;
use library::{Indexer, IndexingProgress, Interpretation};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let music_root = args
        .next()
        .or_else(|| env::var("MUSIC_ROOT").ok())
        .ok_or("MUSIC_ROOT not set and no path argument")?;
    let cache_path = args
        .next()
        .or_else(|| env::var("CACHE_PATH").ok())
        .unwrap_or_else(|| "data/tags.redb".to_string());

    let interpretation = match env::var("SETTINGS_PATH") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            serde_yaml::from_str(&raw)?
        }
        Err(_) => Interpretation::default(),
    };

    let cache = TagCache::open_or_default(&PathBuf::from(&cache_path));
    let indexer = Indexer::new(cache);
    let library = indexer
        .run(
            &[PathBuf::from(&music_root)],
            &interpretation,
            CancellationToken::new(),
            |progress| {
                if let IndexingProgress::Songs { loaded, explored } = progress {
                    info!("Extracted {}/{} candidates", loaded, explored);
                }
            },
        )
        .await?;

    let stats = library.stats();
    println!(
        "Indexed: {} songs, {} albums, {} artists, {} genres, {} playlists",
        stats.songs, stats.albums, stats.artists, stats.genres, stats.playlists
    );

    Ok(())
}
