use std::path::Path;

use lofty::picture::{Picture, PictureType};
use lofty::prelude::TaggedFileExt;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardVisualKey, Visual};
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::MetadataError;

/// One way of pulling embedded artwork out of a file.
pub trait CoverSource: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Option<Vec<u8>>, MetadataError>;
}

/// Composes an ordered list of sources, returning the first non-null
/// result. Invoked on demand by consumers, not during bulk indexing.
pub struct CoverExtractor {
    sources: Vec<Box<dyn CoverSource>>,
}

impl CoverExtractor {
    pub fn new(sources: Vec<Box<dyn CoverSource>>) -> Self {
        Self { sources }
    }

    pub fn with_default_sources() -> Self {
        Self::new(vec![
            Box::new(LoftyCoverSource),
            Box::new(SymphoniaCoverSource),
        ])
    }

    /// None when no source yields data; a failing source falls through to
    /// the next one rather than surfacing an error.
    pub fn extract(&self, path: &Path) -> Option<Vec<u8>> {
        for source in &self.sources {
            match source.extract(path) {
                Ok(Some(data)) => return Some(data),
                Ok(None) => {}
                Err(err) => {
                    debug!("Cover source failed for {:?}: {}", path, err);
                }
            }
        }
        None
    }
}

pub struct LoftyCoverSource;

impl CoverSource for LoftyCoverSource {
    fn extract(&self, path: &Path) -> Result<Option<Vec<u8>>, MetadataError> {
        let tagged_file = lofty::read_from_path(path)?;
        let tag = match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
            Some(tag) => tag,
            None => return Ok(None),
        };
        Ok(pick_picture(tag.pictures()).map(|picture| picture.data().to_vec()))
    }
}

pub struct SymphoniaCoverSource;

impl CoverSource for SymphoniaCoverSource {
    fn extract(&self, path: &Path) -> Result<Option<Vec<u8>>, MetadataError> {
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

        if let Some(metadata) = probed.metadata.get() {
            if let Some(data) = revision_cover(metadata.current()) {
                return Ok(Some(data));
            }
        }
        Ok(revision_cover(probed.format.metadata().current()))
    }
}

fn revision_cover(revision: Option<&MetadataRevision>) -> Option<Vec<u8>> {
    revision
        .and_then(|revision| pick_visual(revision.visuals()))
        .map(|visual| visual.data.to_vec())
}

/// Prefer the picture explicitly tagged as the front cover; otherwise the
/// first picture encountered wins, in container order.
fn pick_picture(pictures: &[Picture]) -> Option<&Picture> {
    for picture in pictures {
        if picture.pic_type() == PictureType::CoverFront {
            return Some(picture);
        }
    }
    pictures.first()
}

fn pick_visual(visuals: &[Visual]) -> Option<&Visual> {
    for visual in visuals {
        if visual.usage == Some(StandardVisualKey::FrontCover) {
            return Some(visual);
        }
    }
    visuals.first()
}
