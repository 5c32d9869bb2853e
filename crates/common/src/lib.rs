use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

const SIG_SEP: char = '\x1f';

/// Recognized raw tag keys. Extraction backends normalize their own key
/// vocabulary onto these before anything downstream sees the tags.
pub mod tagkey {
    pub const TITLE: &str = "TITLE";
    pub const ALBUM: &str = "ALBUM";
    pub const ARTIST: &str = "ARTIST";
    pub const ALBUM_ARTIST: &str = "ALBUMARTIST";
    pub const TRACK_NUMBER: &str = "TRACKNUMBER";
    pub const DISC_NUMBER: &str = "DISCNUMBER";
    pub const GENRE: &str = "GENRE";
    pub const DATE: &str = "DATE";
    pub const COMPOSER: &str = "COMPOSER";
    pub const COMMENT: &str = "COMMENT";
}

/// Identity unit of an observed file. Immutable once observed; a changed
/// size or mtime is a distinct version, not an update.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified_secs: u64,
}

impl DeviceFile {
    pub fn signature(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.path.to_string_lossy());
        out.push(SIG_SEP);
        out.push_str(&self.size.to_string());
        out.push(SIG_SEP);
        out.push_str(&self.modified_secs.to_string());
        out
    }
}

/// Raw tag snapshot; multi-value tags keep their order of appearance.
pub type RawTags = BTreeMap<String, Vec<String>>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioProperties {
    pub bitrate_kbps: Option<u32>,
    pub sample_rate_hz: Option<u32>,
    pub duration_ms: Option<u64>,
    pub mime: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub name: String,
    pub track_no: Option<u32>,
    pub disc_no: Option<u32>,
    pub duration_ms: Option<u64>,
    pub properties: AudioProperties,
    pub raw_tags: RawTags,
    pub file: DeviceFile,
    pub album_id: String,
    pub artist_ids: Vec<String>,
    pub genre_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub artist_id: String,
    pub song_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub album_ids: Vec<String>,
    pub song_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Genre {
    pub id: String,
    pub name: String,
    pub song_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub song_ids: Vec<String>,
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

pub fn song_id(file: &DeviceFile) -> String {
    stable_id(&file.signature())
}

pub fn album_id(normalized_name: &str, normalized_artist: &str) -> String {
    let mut key = String::new();
    key.push_str(normalized_name);
    key.push(SIG_SEP);
    key.push_str(normalized_artist);
    stable_id(&key)
}

pub fn artist_id(normalized_name: &str) -> String {
    stable_id(normalized_name)
}

pub fn genre_id(normalized_name: &str) -> String {
    stable_id(normalized_name)
}

/// Normalization used for entity identity: trimmed, whitespace-collapsed,
/// optionally lowercased. Identical normalized names always collapse to
/// one entity.
pub fn normalize_name(input: &str, case_insensitive: bool) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.trim().chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else if case_insensitive {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            last_space = false;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{normalize_name, song_id, stable_id, DeviceFile};
    use std::path::PathBuf;

    #[test]
    fn stable_id_is_deterministic() {
        let first = stable_id("Artist/Album/Track.mp3");
        let second = stable_id("Artist/Album/Track.mp3");
        assert_eq!(first, second);
        assert_ne!(first, stable_id("Artist/Album/Track2.mp3"));
    }

    #[test]
    fn song_id_changes_with_identity() {
        let file = DeviceFile {
            path: PathBuf::from("/music/a.mp3"),
            size: 100,
            modified_secs: 1000,
        };
        let same = file.clone();
        assert_eq!(song_id(&file), song_id(&same));

        let touched = DeviceFile {
            modified_secs: 1001,
            ..file.clone()
        };
        assert_ne!(song_id(&file), song_id(&touched));

        let grown = DeviceFile { size: 101, ..file };
        assert_ne!(song_id(&grown), song_id(&touched));
    }

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize_name("  The   Beatles ", true), "the beatles");
        assert_eq!(normalize_name("The  Beatles", false), "The Beatles");
    }
}
