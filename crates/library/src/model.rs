use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use common::{
    album_id, artist_id, genre_id, song_id, stable_id, tagkey, Album, Artist, AudioProperties,
    DeviceFile, Genre, Playlist, RawTags, Song, UNKNOWN_ALBUM, UNKNOWN_ARTIST,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::interpret::{all_tags, first_tag, parse_position, Interpretation};
use crate::Library;

/// An audio file after extraction, cached or live. Empty tags are a valid
/// outcome, not an error.
#[derive(Clone, Debug)]
pub struct AudioFile {
    pub file: DeviceFile,
    pub tags: RawTags,
    pub properties: AudioProperties,
}

/// A parsed playlist file. Entries are absolute candidate paths that may
/// or may not resolve to indexed songs.
#[derive(Clone, Debug)]
pub struct PlaylistFile {
    pub file: DeviceFile,
    pub name: String,
    pub entries: Vec<PathBuf>,
}

/// Consumes both streams to completion, then assembles the snapshot. The
/// result does not depend on arrival order.
pub async fn model(
    mut audios: mpsc::UnboundedReceiver<AudioFile>,
    mut playlists: mpsc::Receiver<PlaylistFile>,
    interpretation: &Interpretation,
) -> Library {
    let mut audio_files = Vec::new();
    let mut playlist_files = Vec::new();
    let mut audios_done = false;
    let mut playlists_done = false;
    while !(audios_done && playlists_done) {
        tokio::select! {
            audio = audios.recv(), if !audios_done => match audio {
                Some(audio) => audio_files.push(audio),
                None => audios_done = true,
            },
            playlist = playlists.recv(), if !playlists_done => match playlist {
                Some(playlist) => playlist_files.push(playlist),
                None => playlists_done = true,
            },
        }
    }
    build(audio_files, playlist_files, interpretation)
}

struct AlbumDraft {
    name: String,
    name_norm: String,
    artist_name: String,
    artist_norm: String,
    songs: Vec<SongOrder>,
}

/// Within-album ordering: disc, then track, then name, then path. Unset
/// positions sort last.
struct SongOrder {
    disc_no: u32,
    track_no: u32,
    name_key: String,
    path: PathBuf,
    song_id: String,
}

struct NamedDraft {
    name: String,
    album_ids: Vec<String>,
    song_ids: Vec<String>,
}

pub(crate) fn build(
    mut audio_files: Vec<AudioFile>,
    mut playlist_files: Vec<PlaylistFile>,
    interpretation: &Interpretation,
) -> Library {
    // Path order fixes every first-seen choice below, making the whole
    // snapshot independent of extraction completion order.
    audio_files.sort_by(|a, b| a.file.path.cmp(&b.file.path));
    playlist_files.sort_by(|a, b| a.file.path.cmp(&b.file.path));

    let mut songs: HashMap<String, Song> = HashMap::new();
    let mut albums: HashMap<String, AlbumDraft> = HashMap::new();
    let mut artists: HashMap<String, NamedDraft> = HashMap::new();
    let mut genres: HashMap<String, NamedDraft> = HashMap::new();
    let mut by_path: HashMap<PathBuf, String> = HashMap::new();

    for audio in audio_files {
        let id = song_id(&audio.file);
        if songs.contains_key(&id) {
            debug!("Dropping duplicate candidate {:?}", audio.file.path);
            continue;
        }

        let name = first_tag(&audio.tags, tagkey::TITLE)
            .map(str::to_string)
            .unwrap_or_else(|| fallback_name(&audio.file));
        let track_no = first_tag(&audio.tags, tagkey::TRACK_NUMBER).and_then(parse_position);
        let disc_no = first_tag(&audio.tags, tagkey::DISC_NUMBER).and_then(parse_position);

        let mut artist_names = split_all(&audio.tags, tagkey::ARTIST, interpretation);
        if artist_names.is_empty() {
            artist_names.push(UNKNOWN_ARTIST.to_string());
        }
        let album_artist_names = {
            let explicit = split_all(&audio.tags, tagkey::ALBUM_ARTIST, interpretation);
            if explicit.is_empty() {
                artist_names.clone()
            } else {
                explicit
            }
        };
        let album_artist_name = album_artist_names[0].clone();
        let album_artist_norm = interpretation.normalize(&album_artist_name);

        let album_name = first_tag(&audio.tags, tagkey::ALBUM)
            .unwrap_or(UNKNOWN_ALBUM)
            .to_string();
        let album_name_norm = interpretation.normalize(&album_name);
        let album = album_id(&album_name_norm, &album_artist_norm);

        let genre_names = split_all(&audio.tags, tagkey::GENRE, interpretation);

        let mut artist_ids = Vec::new();
        for artist_name in &artist_names {
            let norm = interpretation.normalize(artist_name);
            let artist = artist_id(&norm);
            if !artist_ids.contains(&artist) {
                artist_ids.push(artist.clone());
                let draft = artists.entry(artist).or_insert_with(|| NamedDraft {
                    name: artist_name.clone(),
                    album_ids: Vec::new(),
                    song_ids: Vec::new(),
                });
                draft.song_ids.push(id.clone());
            }
        }

        let mut genre_ids = Vec::new();
        for genre_name in &genre_names {
            let norm = interpretation.normalize(genre_name);
            let genre = genre_id(&norm);
            if !genre_ids.contains(&genre) {
                genre_ids.push(genre.clone());
                let draft = genres.entry(genre).or_insert_with(|| NamedDraft {
                    name: genre_name.clone(),
                    album_ids: Vec::new(),
                    song_ids: Vec::new(),
                });
                draft.song_ids.push(id.clone());
            }
        }

        let draft = albums.entry(album.clone()).or_insert_with(|| AlbumDraft {
            name: album_name,
            name_norm: album_name_norm,
            artist_name: album_artist_name,
            artist_norm: album_artist_norm,
            songs: Vec::new(),
        });
        draft.songs.push(SongOrder {
            disc_no: disc_no.unwrap_or(u32::MAX),
            track_no: track_no.unwrap_or(u32::MAX),
            name_key: name.to_lowercase(),
            path: audio.file.path.clone(),
            song_id: id.clone(),
        });

        by_path.insert(audio.file.path.clone(), id.clone());
        songs.insert(
            id.clone(),
            Song {
                id,
                name,
                track_no,
                disc_no,
                duration_ms: audio.properties.duration_ms,
                properties: audio.properties,
                raw_tags: audio.tags,
                file: audio.file,
                album_id: album,
                artist_ids,
                genre_ids,
            },
        );
    }

    // Albums in (artist, name) order so artist album lists come out stable.
    let mut album_order: Vec<String> = albums.keys().cloned().collect();
    album_order.sort_by(|a, b| {
        let left = &albums[a];
        let right = &albums[b];
        (&left.artist_norm, &left.name_norm).cmp(&(&right.artist_norm, &right.name_norm))
    });

    let mut final_albums: HashMap<String, Album> = HashMap::new();
    for id in album_order {
        let mut draft = match albums.remove(&id) {
            Some(draft) => draft,
            None => continue,
        };
        draft.songs.sort_by(|a, b| {
            (a.disc_no, a.track_no, &a.name_key, &a.path)
                .cmp(&(b.disc_no, b.track_no, &b.name_key, &b.path))
        });

        let artist = artist_id(&draft.artist_norm);
        let owner = artists.entry(artist.clone()).or_insert_with(|| NamedDraft {
            name: draft.artist_name.clone(),
            album_ids: Vec::new(),
            song_ids: Vec::new(),
        });
        owner.album_ids.push(id.clone());

        final_albums.insert(
            id.clone(),
            Album {
                id,
                name: draft.name,
                artist_id: artist,
                song_ids: draft.songs.into_iter().map(|order| order.song_id).collect(),
            },
        );
    }

    let final_artists = artists
        .into_iter()
        .map(|(id, draft)| {
            (
                id.clone(),
                Artist {
                    id,
                    name: draft.name,
                    album_ids: draft.album_ids,
                    song_ids: draft.song_ids,
                },
            )
        })
        .collect();
    let final_genres = genres
        .into_iter()
        .map(|(id, draft)| {
            (
                id.clone(),
                Genre {
                    id,
                    name: draft.name,
                    song_ids: draft.song_ids,
                },
            )
        })
        .collect();

    let mut final_playlists: HashMap<String, Playlist> = HashMap::new();
    for playlist in playlist_files {
        let song_ids: Vec<String> = playlist
            .entries
            .iter()
            .filter_map(|entry| {
                let resolved = std::fs::canonicalize(entry).unwrap_or_else(|_| entry.clone());
                let found = by_path.get(&resolved).cloned();
                if found.is_none() {
                    debug!(
                        "Dropping unresolved entry {:?} of playlist {:?}",
                        entry, playlist.file.path
                    );
                }
                found
            })
            .collect();
        let id = stable_id(&playlist.file.path.to_string_lossy());
        final_playlists.insert(
            id.clone(),
            Playlist {
                id,
                name: playlist.name,
                song_ids,
            },
        );
    }

    Library::assemble(songs, final_albums, final_artists, final_genres, final_playlists)
}

fn split_all(tags: &RawTags, key: &str, interpretation: &Interpretation) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for value in all_tags(tags, key) {
        for name in interpretation.split_values(value) {
            if seen.insert(interpretation.normalize(&name)) {
                out.push(name);
            }
        }
    }
    out
}

fn fallback_name(file: &DeviceFile) -> String {
    file.path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::{build, AudioFile, PlaylistFile};
    use crate::interpret::Interpretation;
    use common::{tagkey, AudioProperties, DeviceFile, RawTags, UNKNOWN_ARTIST};
    use std::path::PathBuf;

    fn audio(path: &str, pairs: &[(&str, &str)]) -> AudioFile {
        let mut tags = RawTags::new();
        for (key, value) in pairs {
            tags.entry((*key).to_string())
                .or_default()
                .push((*value).to_string());
        }
        AudioFile {
            file: DeviceFile {
                path: PathBuf::from(path),
                size: path.len() as u64,
                modified_secs: 1_000,
            },
            tags,
            properties: AudioProperties::default(),
        }
    }

    #[test]
    fn identical_album_tags_collapse_into_one_album() {
        let files = vec![
            audio(
                "/music/a/02.mp3",
                &[
                    (tagkey::ALBUM, "Revolver"),
                    (tagkey::ARTIST, "The Beatles"),
                    (tagkey::TRACK_NUMBER, "2"),
                ],
            ),
            audio(
                "/music/a/01.mp3",
                &[
                    (tagkey::ALBUM, "revolver"),
                    (tagkey::ARTIST, "the beatles"),
                    (tagkey::TRACK_NUMBER, "1/14"),
                ],
            ),
        ];
        let library = build(files, Vec::new(), &Interpretation::default());

        assert_eq!(library.stats().albums, 1);
        let album = library.albums().next().unwrap();
        assert_eq!(album.song_ids.len(), 2);
        let first = library.song(&album.song_ids[0]).unwrap();
        assert_eq!(first.track_no, Some(1));
    }

    #[test]
    fn missing_artist_falls_into_the_unknown_bucket() {
        let files = vec![
            audio("/music/x.mp3", &[(tagkey::TITLE, "Untagged")]),
            audio("/music/y.mp3", &[]),
        ];
        let library = build(files, Vec::new(), &Interpretation::default());

        assert_eq!(library.stats().artists, 1);
        let artist = library.artists().next().unwrap();
        assert_eq!(artist.name, UNKNOWN_ARTIST);
        assert_eq!(artist.song_ids.len(), 2);
    }

    #[test]
    fn zero_tag_file_is_a_valid_song_named_after_the_file() {
        let files = vec![audio("/music/found sound.flac", &[])];
        let library = build(files, Vec::new(), &Interpretation::default());

        assert_eq!(library.stats().songs, 1);
        let song = library.songs().next().unwrap();
        assert_eq!(song.name, "found sound");
        assert_eq!(song.track_no, None);
        assert!(song.genre_ids.is_empty());
    }

    #[test]
    fn genres_are_many_to_many() {
        let files = vec![
            audio(
                "/music/a.mp3",
                &[(tagkey::GENRE, "Rock; Blues"), (tagkey::ARTIST, "A")],
            ),
            audio(
                "/music/b.mp3",
                &[(tagkey::GENRE, "Rock"), (tagkey::ARTIST, "B")],
            ),
        ];
        let library = build(files, Vec::new(), &Interpretation::default());

        assert_eq!(library.stats().genres, 2);
        let rock = library
            .genres()
            .find(|genre| genre.name == "Rock")
            .unwrap();
        assert_eq!(rock.song_ids.len(), 2);
    }

    #[test]
    fn multi_value_artists_split_on_separators() {
        let files = vec![audio(
            "/music/duet.mp3",
            &[(tagkey::ARTIST, "Simon / Garfunkel")],
        )];
        let library = build(files, Vec::new(), &Interpretation::default());

        let song = library.songs().next().unwrap();
        assert_eq!(song.artist_ids.len(), 2);
        assert_eq!(library.stats().artists, 2);
    }

    #[test]
    fn snapshot_is_independent_of_arrival_order() {
        let forward = vec![
            audio("/music/a.mp3", &[(tagkey::ALBUM, "X"), (tagkey::ARTIST, "A")]),
            audio("/music/b.mp3", &[(tagkey::ALBUM, "X"), (tagkey::ARTIST, "A")]),
            audio("/music/c.mp3", &[(tagkey::ALBUM, "Y"), (tagkey::ARTIST, "B")]),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let first = build(forward, Vec::new(), &Interpretation::default());
        let second = build(reversed, Vec::new(), &Interpretation::default());

        let mut first_ids: Vec<_> = first.songs().map(|song| song.id.clone()).collect();
        let mut second_ids: Vec<_> = second.songs().map(|song| song.id.clone()).collect();
        first_ids.sort();
        second_ids.sort();
        assert_eq!(first_ids, second_ids);

        for album in first.albums() {
            let twin = second.album(&album.id).unwrap();
            assert_eq!(album.song_ids, twin.song_ids);
        }
    }

    #[test]
    fn rescan_of_unchanged_files_reuses_every_id() {
        let files = vec![
            audio(
                "/music/a.mp3",
                &[
                    (tagkey::ALBUM, "X"),
                    (tagkey::ARTIST, "A"),
                    (tagkey::GENRE, "Rock"),
                ],
            ),
            audio("/music/b.mp3", &[(tagkey::ALBUM, "X"), (tagkey::ARTIST, "A")]),
        ];

        let first = build(files.clone(), Vec::new(), &Interpretation::default());
        let second = build(files, Vec::new(), &Interpretation::default());

        let collect = |library: &crate::Library| {
            let mut ids: Vec<String> = library
                .songs()
                .map(|song| song.id.clone())
                .chain(library.albums().map(|album| album.id.clone()))
                .chain(library.artists().map(|artist| artist.id.clone()))
                .chain(library.genres().map(|genre| genre.id.clone()))
                .collect();
            ids.sort();
            ids
        };
        assert_eq!(collect(&first), collect(&second));
    }

    #[test]
    fn playlist_entries_missing_from_the_library_are_dropped() {
        let files = vec![audio("/music/a.mp3", &[(tagkey::TITLE, "A")])];
        let playlist = PlaylistFile {
            file: DeviceFile {
                path: PathBuf::from("/music/list.m3u"),
                size: 10,
                modified_secs: 1_000,
            },
            name: "Mixed".to_string(),
            entries: vec![PathBuf::from("/music/a.mp3"), PathBuf::from("/music/gone.mp3")],
        };
        let library = build(files, vec![playlist], &Interpretation::default());

        let playlist = library.playlists().next().unwrap();
        assert_eq!(playlist.name, "Mixed");
        assert_eq!(playlist.song_ids.len(), 1);
    }

    #[tokio::test]
    async fn model_consumes_concurrent_streams_to_completion() {
        use tokio::sync::mpsc;

        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (playlist_tx, playlist_rx) = mpsc::channel(4);

        let producer = tokio::spawn(async move {
            for index in 0..50 {
                let path = format!("/music/{index:03}.mp3");
                audio_tx
                    .send(audio(&path, &[(tagkey::ALBUM, "Big"), (tagkey::ARTIST, "A")]))
                    .unwrap();
            }
            drop(playlist_tx);
        });

        let interpretation = Interpretation::default();
        let library = super::model(audio_rx, playlist_rx, &interpretation).await;
        producer.await.unwrap();

        assert_eq!(library.stats().songs, 50);
        assert_eq!(library.stats().albums, 1);
    }
}
