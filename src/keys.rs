//! Key derivation from filesystem paths.
//!
//! A file's location relative to the walk root becomes the leading segments
//! of every key flattened out of it. `/data/app/db.json` walked from `/data`
//! with prefix `svc` seeds keys under `svc/app/db/`.

use std::fmt;
use std::path::{Component, Path};

use tracing::debug;

/// Separator used between segments of a flat key, independent of platform.
pub const KEY_SEPARATOR: char = '/';

/// Input formats recognised by file suffix or by `--format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Yaml,
    /// Recognised but not parsed yet; contributes no keys.
    Properties,
    /// Recognised but not parsed yet; contributes no keys.
    Ini,
}

impl Format {
    /// Suffixes matched case-insensitively against file names.
    const SUFFIXES: &'static [(&'static str, Format)] = &[
        (".json", Format::Json),
        (".yml", Format::Yaml),
        (".yaml", Format::Yaml),
        (".properties", Format::Properties),
        (".ini", Format::Ini),
    ];

    /// Detect the format from a file name. Unrecognised suffixes yield `None`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        Self::SUFFIXES
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix))
            .map(|(_, format)| *format)
    }

    /// Parse a format name given on the command line. Only formats that can
    /// actually be decoded are accepted for streams.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "json" => Some(Format::Json),
            "yaml" | "yml" => Some(Format::Yaml),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
            Format::Properties => "properties",
            Format::Ini => "ini",
        }
    }

    /// Whether a parse failure in this format aborts a directory walk.
    ///
    /// Malformed JSON is fatal while malformed YAML is logged and the file's
    /// keys are dropped. This asymmetry is long-standing behaviour that
    /// existing deployments rely on.
    pub fn parse_failure_is_fatal(&self) -> bool {
        matches!(self, Format::Json)
    }

    /// Return `name` with a recognised suffix removed, matching case-insensitively.
    fn strip_suffix(name: &str) -> &str {
        for (suffix, _) in Self::SUFFIXES {
            if let Some(cut) = name.len().checked_sub(suffix.len())
                && name.is_char_boundary(cut)
                && name[cut..].eq_ignore_ascii_case(suffix)
            {
                return &name[..cut];
            }
        }
        name
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalise a user supplied prefix into key segments.
///
/// Leading and trailing separators are dropped, as are empty segments from
/// doubled separators, so `"/svc//app/"` becomes `["svc", "app"]`.
pub fn prefix_segments(prefix: &str) -> Vec<String> {
    prefix
        .split(KEY_SEPARATOR)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Render a prefix in the form the remote store lists by: segments joined
/// with the separator plus a trailing separator, or empty.
pub fn prefix_path(prefix: &str) -> String {
    let segments = prefix_segments(prefix);
    if segments.is_empty() {
        String::new()
    } else {
        format!("{}{}", segments.join("/"), KEY_SEPARATOR)
    }
}

/// Derive the seed key segments for a file found under `root`.
///
/// The root is stripped from the file path, a recognised format suffix is
/// removed, and the remaining path components become segments after the
/// prefix segments. A file passed directly as the root contributes no
/// segments of its own. A file that does not live under `root` also
/// contributes none; the walk keeps going rather than failing.
pub fn derive(root: &Path, file: &Path, prefix: &[String]) -> Vec<String> {
    let mut segments = prefix.to_vec();

    let relative = match file.strip_prefix(root) {
        Ok(relative) => relative,
        Err(_) => {
            debug!(root = %root.display(), file = %file.display(), "File is outside the walk root");
            return segments;
        }
    };

    let components: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    let last = components.len().saturating_sub(1);
    for (i, part) in components.into_iter().enumerate() {
        let part = if i == last {
            Format::strip_suffix(&part).to_string()
        } else {
            part
        };
        if !part.is_empty() {
            segments.push(part);
        }
    }

    segments
}

/// Join segments into a flat key.
pub fn join(segments: &[String]) -> String {
    segments.join("/")
}
