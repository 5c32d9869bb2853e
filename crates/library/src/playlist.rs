use std::path::{Component, Path, PathBuf};

use common::DeviceFile;
use tokio::fs;

use crate::model::PlaylistFile;

pub(crate) async fn read_playlist(file: &DeviceFile) -> Result<PlaylistFile, std::io::Error> {
    let content = fs::read_to_string(&file.path).await?;
    let base = file.path.parent().unwrap_or_else(|| Path::new(""));
    let (name, entries) = parse_m3u(&content, base);
    let name = name.unwrap_or_else(|| {
        file.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Playlist".to_string())
    });
    Ok(PlaylistFile {
        file: file.clone(),
        name,
        entries,
    })
}

/// Minimal M3U/M3U8 reader. Comment lines are skipped except for the
/// #PLAYLIST: name directive; entries are resolved against the playlist's
/// own directory.
pub(crate) fn parse_m3u(content: &str, base: &Path) -> (Option<String>, Vec<PathBuf>) {
    let mut name = None;
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("#PLAYLIST:") {
            let rest = rest.trim();
            if !rest.is_empty() {
                name = Some(rest.to_string());
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let path = PathBuf::from(line);
        let absolute = if path.is_absolute() {
            path
        } else {
            base.join(path)
        };
        entries.push(lexical_clean(&absolute));
    }
    (name, entries)
}

fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
