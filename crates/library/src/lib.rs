mod indexer;
mod interpret;
mod model;
mod playlist;

pub use indexer::{IndexError, Indexer, IndexingProgress};
pub use interpret::{Collation, Interpretation};
pub use model::{model, AudioFile, PlaylistFile};

use std::collections::HashMap;

use common::{Album, Artist, Genre, Playlist, Song};
use serde::{Deserialize, Serialize};

/// One immutable snapshot of the indexed music library. Entities reference
/// each other by id only; every referenced id resolves within the same
/// snapshot.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Library {
    songs: HashMap<String, Song>,
    albums: HashMap<String, Album>,
    artists: HashMap<String, Artist>,
    genres: HashMap<String, Genre>,
    playlists: HashMap<String, Playlist>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub songs: usize,
    pub albums: usize,
    pub artists: usize,
    pub genres: usize,
    pub playlists: usize,
}

impl Library {
    pub(crate) fn assemble(
        songs: HashMap<String, Song>,
        albums: HashMap<String, Album>,
        artists: HashMap<String, Artist>,
        genres: HashMap<String, Genre>,
        playlists: HashMap<String, Playlist>,
    ) -> Self {
        Self {
            songs,
            albums,
            artists,
            genres,
            playlists,
        }
    }

    pub fn song(&self, id: &str) -> Option<&Song> {
        self.songs.get(id)
    }

    pub fn album(&self, id: &str) -> Option<&Album> {
        self.albums.get(id)
    }

    pub fn artist(&self, id: &str) -> Option<&Artist> {
        self.artists.get(id)
    }

    pub fn genre(&self, id: &str) -> Option<&Genre> {
        self.genres.get(id)
    }

    pub fn playlist(&self, id: &str) -> Option<&Playlist> {
        self.playlists.get(id)
    }

    pub fn songs(&self) -> impl Iterator<Item = &Song> {
        self.songs.values()
    }

    pub fn albums(&self) -> impl Iterator<Item = &Album> {
        self.albums.values()
    }

    pub fn artists(&self) -> impl Iterator<Item = &Artist> {
        self.artists.values()
    }

    pub fn genres(&self) -> impl Iterator<Item = &Genre> {
        self.genres.values()
    }

    pub fn playlists(&self) -> impl Iterator<Item = &Playlist> {
        self.playlists.values()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty() && self.playlists.is_empty()
    }

    pub fn stats(&self) -> LibraryStats {
        LibraryStats {
            songs: self.songs.len(),
            albums: self.albums.len(),
            artists: self.artists.len(),
            genres: self.genres.len(),
            playlists: self.playlists.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Library;

    #[test]
    fn empty_library_has_empty_stats() {
        let library = Library::default();
        assert!(library.is_empty());
        assert_eq!(library.stats().songs, 0);
        assert!(library.song("missing").is_none());
    }
}
