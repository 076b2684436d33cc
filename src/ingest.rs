//! Loading of input files into the flattened map.
//!
//! Each file is read, parsed and flattened completely before the next one is
//! opened. Walk order is sorted by file name so collisions resolve the same
//! way on every platform.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use crate::document::normalize;
use crate::error::{Error, Result};
use crate::flatten::{FlatMap, Flattener};
use crate::keys::{self, Format};

/// Counters for one ingest run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Files parsed and flattened.
    pub files: usize,
    /// Files whose format is recognised but not parsed.
    pub unsupported: usize,
    /// Files dropped after a non-fatal failure.
    pub dropped: usize,
    /// Entries written, including overwrites.
    pub entries: usize,
}

/// Reads sources and flattens them into a shared map.
#[derive(Debug, Clone)]
pub struct Ingestor {
    prefix: Vec<String>,
    flattener: Flattener,
}

impl Ingestor {
    /// `prefix` is the raw user prefix; `glue` joins scalar sequences.
    pub fn new(prefix: &str, glue: &str) -> Self {
        Self {
            prefix: keys::prefix_segments(prefix),
            flattener: Flattener::new(glue),
        }
    }

    pub fn prefix(&self) -> &[String] {
        &self.prefix
    }

    /// Load a directory tree or a single file.
    ///
    /// A path that cannot be inspected is fatal. Inside a tree, unreadable
    /// entries and YAML parse failures are logged and skipped, while a JSON
    /// parse failure stops the walk.
    pub fn load_path(&self, path: &Path, into: &mut FlatMap) -> Result<IngestReport> {
        let root = std::path::absolute(path).map_err(|e| Error::access(path, e))?;
        let metadata = std::fs::metadata(&root).map_err(|e| Error::access(&root, e))?;
        info!(path = %root.display(), "Looking for data");

        let mut report = IngestReport::default();
        if metadata.is_file() {
            self.load_file(&root, &root, into, &mut report)?;
            return Ok(report);
        }

        let walker = WalkDir::new(&root).sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let at = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    warn!(path = %at.display(), error = %e, "Skipping unreadable entry");
                    report.dropped += 1;
                    continue;
                }
            };
            trace!(path = %entry.path().display(), "Traversing");
            if !entry.file_type().is_file() {
                continue;
            }
            self.load_file(&root, entry.path(), into, &mut report)?;
        }

        Ok(report)
    }

    fn load_file(&self, root: &Path, file: &Path, into: &mut FlatMap, report: &mut IngestReport) -> Result<()> {
        let Some(format) = Format::from_path(file) else {
            trace!(path = %file.display(), "Ignoring file with unrecognised suffix");
            return Ok(());
        };

        let segments = keys::derive(root, file, &self.prefix);
        debug!(path = %file.display(), format = %format, key_prefix = ?segments, "Parsing file");

        let reader = match File::open(file) {
            Ok(f) => BufReader::new(f),
            Err(e) => {
                warn!(path = %file.display(), error = %e, "Cannot open file; skipping");
                report.dropped += 1;
                return Ok(());
            }
        };

        self.load_source(reader, format, &segments, &file.display().to_string(), into, report)
    }

    /// Load a single stream of the declared format.
    pub fn load_reader<R: Read>(&self, reader: R, format: Format, into: &mut FlatMap) -> Result<IngestReport> {
        info!(format = %format, "Looking for data on stdin");
        let mut report = IngestReport::default();
        let prefix = self.prefix.clone();
        self.load_source(reader, format, &prefix, "<stdin>", into, &mut report)?;
        Ok(report)
    }

    fn load_source<R: Read>(
        &self,
        reader: R,
        format: Format,
        segments: &[String],
        label: &str,
        into: &mut FlatMap,
        report: &mut IngestReport,
    ) -> Result<()> {
        if matches!(format, Format::Properties | Format::Ini) {
            debug!(source = %label, format = %format, "Format not supported yet; no keys read");
            report.unsupported += 1;
            return Ok(());
        }

        let doc = match normalize(reader, format, label) {
            Ok(doc) => doc,
            Err(e @ Error::Parse { .. }) if !format.parse_failure_is_fatal() => {
                warn!(source = %label, error = %e, "Dropping unparseable file");
                report.dropped += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        report.files += 1;
        report.entries += self.flattener.flatten(&doc, segments, into, label);
        Ok(())
    }
}

/// Input selected on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Path(PathBuf),
    Stdin(Format),
}

impl Input {
    /// Resolve positional arguments and `--format` into an input.
    ///
    /// Zero paths means stdin, which needs a decodable format. More than
    /// one path is a usage error.
    pub fn from_args(paths: &[PathBuf], format: Option<&str>) -> Result<Self> {
        match paths {
            [] => match format.and_then(Format::from_name) {
                Some(format) => Ok(Input::Stdin(format)),
                None => Err(Error::usage(
                    "when reading from stdin, --format must be provided and must be one of: json, yaml",
                )),
            },
            [path] => Ok(Input::Path(path.clone())),
            more => Err(Error::usage(format!(
                "1 argument expected, but found {}",
                more.len()
            ))),
        }
    }
}
