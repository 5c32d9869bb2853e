mod cover;

pub use cover::{CoverExtractor, CoverSource, LoftyCoverSource, SymphoniaCoverSource};

use std::path::Path;

use common::{tagkey, AudioProperties, RawTags};
use lofty::error::LoftyError;
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};
use lofty::tag::Tag;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use tracing::debug;

/// Result of one live extraction. Tags and properties are independently
/// optional: a readable file with no tags is not a failure.
#[derive(Clone, Debug, Default)]
pub struct ExtractedMetadata {
    pub tags: Option<RawTags>,
    pub properties: AudioProperties,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    Symphonia(SymphoniaError),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag parse error: {}", err),
            MetadataError::Symphonia(err) => write!(f, "probe error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

impl From<SymphoniaError> for MetadataError {
    fn from(err: SymphoniaError) -> Self {
        MetadataError::Symphonia(err)
    }
}

/// Live extraction with a fallback chain: lofty first, then a symphonia
/// probe when lofty fails outright or yields neither tags nor properties.
/// An error here means neither backend could open the file at all.
pub fn extract(path: &Path) -> Result<ExtractedMetadata, MetadataError> {
    match extract_lofty(path) {
        Ok(extracted) => {
            if extracted.tags.is_none() && extracted.properties.duration_ms.is_none() {
                if let Ok(fallback) = extract_symphonia(path) {
                    return Ok(merge(extracted, fallback));
                }
            }
            Ok(extracted)
        }
        Err(primary) => {
            debug!(
                "Primary extraction failed for {:?} ({}); trying probe fallback",
                path, primary
            );
            match extract_symphonia(path) {
                Ok(extracted) => Ok(extracted),
                Err(_) => Err(primary),
            }
        }
    }
}

const LOFTY_KEYS: &[(&str, ItemKey)] = &[
    (tagkey::TITLE, ItemKey::TrackTitle),
    (tagkey::ALBUM, ItemKey::AlbumTitle),
    (tagkey::ARTIST, ItemKey::TrackArtist),
    (tagkey::ALBUM_ARTIST, ItemKey::AlbumArtist),
    (tagkey::TRACK_NUMBER, ItemKey::TrackNumber),
    (tagkey::DISC_NUMBER, ItemKey::DiscNumber),
    (tagkey::GENRE, ItemKey::Genre),
    (tagkey::DATE, ItemKey::Year),
    (tagkey::COMPOSER, ItemKey::Composer),
    (tagkey::COMMENT, ItemKey::Comment),
];

fn extract_lofty(path: &Path) -> Result<ExtractedMetadata, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let file_properties = tagged_file.properties();

    let duration_ms = file_properties.duration().as_millis();
    let properties = AudioProperties {
        bitrate_kbps: file_properties
            .audio_bitrate()
            .or(file_properties.overall_bitrate()),
        sample_rate_hz: file_properties.sample_rate(),
        duration_ms: if duration_ms > 0 {
            Some(duration_ms.min(u128::from(u64::MAX)) as u64)
        } else {
            None
        },
        mime: resolved_mime(path),
    };

    let tags = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())
        .map(collect_lofty_tags)
        .filter(|tags| !tags.is_empty());

    Ok(ExtractedMetadata { tags, properties })
}

fn collect_lofty_tags(tag: &Tag) -> RawTags {
    let mut out = RawTags::new();
    for (name, item_key) in LOFTY_KEYS {
        let values: Vec<String> = tag
            .get_strings(item_key)
            .map(|value| value.to_string())
            .collect();
        if !values.is_empty() {
            out.insert((*name).to_string(), values);
        }
    }
    out
}

fn extract_symphonia(path: &Path) -> Result<ExtractedMetadata, MetadataError> {
    let src = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }
    let mut probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut properties = AudioProperties {
        mime: resolved_mime(path),
        ..Default::default()
    };
    if let Some(track) = probed.format.default_track() {
        let params = &track.codec_params;
        properties.sample_rate_hz = params.sample_rate;
        if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
            if rate > 0 {
                properties.duration_ms = Some(frames.saturating_mul(1000) / u64::from(rate));
            }
        }
    }

    let mut tags = RawTags::new();
    if let Some(metadata) = probed.metadata.get() {
        if let Some(revision) = metadata.current() {
            collect_symphonia_tags(revision, &mut tags);
        }
    }
    if tags.is_empty() {
        if let Some(revision) = probed.format.metadata().current() {
            collect_symphonia_tags(revision, &mut tags);
        }
    }

    Ok(ExtractedMetadata {
        tags: if tags.is_empty() { None } else { Some(tags) },
        properties,
    })
}

fn collect_symphonia_tags(revision: &MetadataRevision, out: &mut RawTags) {
    for tag in revision.tags() {
        let name = match tag.std_key.and_then(standard_key_name) {
            Some(name) => name,
            None => continue,
        };
        let value = tag.value.to_string();
        if value.is_empty() {
            continue;
        }
        out.entry(name.to_string()).or_default().push(value);
    }
}

fn standard_key_name(key: StandardTagKey) -> Option<&'static str> {
    match key {
        StandardTagKey::TrackTitle => Some(tagkey::TITLE),
        StandardTagKey::Album => Some(tagkey::ALBUM),
        StandardTagKey::Artist => Some(tagkey::ARTIST),
        StandardTagKey::AlbumArtist => Some(tagkey::ALBUM_ARTIST),
        StandardTagKey::TrackNumber => Some(tagkey::TRACK_NUMBER),
        StandardTagKey::DiscNumber => Some(tagkey::DISC_NUMBER),
        StandardTagKey::Genre => Some(tagkey::GENRE),
        StandardTagKey::Date => Some(tagkey::DATE),
        StandardTagKey::Composer => Some(tagkey::COMPOSER),
        StandardTagKey::Comment => Some(tagkey::COMMENT),
        _ => None,
    }
}

fn merge(primary: ExtractedMetadata, fallback: ExtractedMetadata) -> ExtractedMetadata {
    ExtractedMetadata {
        tags: primary.tags.or(fallback.tags),
        properties: AudioProperties {
            bitrate_kbps: primary
                .properties
                .bitrate_kbps
                .or(fallback.properties.bitrate_kbps),
            sample_rate_hz: primary
                .properties
                .sample_rate_hz
                .or(fallback.properties.sample_rate_hz),
            duration_ms: primary
                .properties
                .duration_ms
                .or(fallback.properties.duration_ms),
            mime: primary.properties.mime,
        },
    }
}

fn resolved_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::{extract, merge, ExtractedMetadata};
    use common::{tagkey, AudioProperties, RawTags};

    #[test]
    fn unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-audio.mp3");
        std::fs::write(&path, b"definitely not an mp3 frame").unwrap();
        assert!(extract(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(extract(&dir.path().join("gone.flac")).is_err());
    }

    #[test]
    fn merge_prefers_primary_and_fills_gaps() {
        let mut fallback_tags = RawTags::new();
        fallback_tags.insert(tagkey::TITLE.to_string(), vec!["Fallback".to_string()]);

        let primary = ExtractedMetadata {
            tags: None,
            properties: AudioProperties {
                bitrate_kbps: Some(320),
                sample_rate_hz: None,
                duration_ms: None,
                mime: "audio/mpeg".to_string(),
            },
        };
        let fallback = ExtractedMetadata {
            tags: Some(fallback_tags.clone()),
            properties: AudioProperties {
                bitrate_kbps: Some(128),
                sample_rate_hz: Some(44_100),
                duration_ms: Some(1_000),
                mime: "audio/mpeg".to_string(),
            },
        };

        let merged = merge(primary, fallback);
        assert_eq!(merged.tags, Some(fallback_tags));
        assert_eq!(merged.properties.bitrate_kbps, Some(320));
        assert_eq!(merged.properties.sample_rate_hz, Some(44_100));
        assert_eq!(merged.properties.duration_ms, Some(1_000));
    }
}
