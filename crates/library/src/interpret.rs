use common::RawTags;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Collation {
    CaseInsensitive,
    CaseSensitive,
}

impl Default for Collation {
    fn default() -> Self {
        Collation::CaseInsensitive
    }
}

/// User-facing knobs for how raw tags become library entities.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Interpretation {
    /// Separator strings splitting one tag value into several names, tried
    /// in order.
    pub separators: Vec<String>,
    pub collation: Collation,
    pub exclude_hidden: bool,
}

impl Default for Interpretation {
    fn default() -> Self {
        Self {
            separators: vec![";".to_string(), "/".to_string()],
            collation: Collation::CaseInsensitive,
            exclude_hidden: true,
        }
    }
}

impl Interpretation {
    pub(crate) fn normalize(&self, name: &str) -> String {
        common::normalize_name(name, self.collation == Collation::CaseInsensitive)
    }

    /// Splits a multi-name tag value on the configured separators, trimming
    /// each part and dropping empties. No separators means the value is one
    /// name.
    pub fn split_values(&self, value: &str) -> Vec<String> {
        let mut parts: Vec<&str> = vec![value];
        for separator in &self.separators {
            if separator.is_empty() {
                continue;
            }
            parts = parts
                .into_iter()
                .flat_map(|part| part.split(separator.as_str()))
                .collect();
        }
        parts
            .into_iter()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect()
    }
}

pub(crate) fn first_tag<'a>(tags: &'a RawTags, key: &str) -> Option<&'a str> {
    tags.get(key)
        .and_then(|values| values.first())
        .map(String::as_str)
}

pub(crate) fn all_tags<'a>(tags: &'a RawTags, key: &str) -> &'a [String] {
    tags.get(key).map(Vec::as_slice).unwrap_or(&[])
}

/// Parses positional tags of both the plain form ("7") and the
/// position-of-total form ("3/12").
pub(crate) fn parse_position(value: &str) -> Option<u32> {
    value.split('/').next()?.trim().parse().ok()
}
