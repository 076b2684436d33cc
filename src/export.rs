//! Dump of the flattened map in the format `consul kv import` reads.
//!
//! The dump is a JSON array of `{"key", "flags", "value"}` objects sorted by
//! key, with values base64 encoded, indented with tabs.

use std::io::Write;
use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::flatten::FlatMap;

/// One exported key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    pub key: String,
    #[serde(default)]
    pub flags: u64,
    /// Base64 of the raw value bytes.
    pub value: String,
}

impl ExportEntry {
    pub fn new(key: &str, value: &[u8]) -> Self {
        Self {
            key: key.to_string(),
            flags: 0,
            value: STANDARD.encode(value),
        }
    }

    pub fn decoded_value(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.value)
            .map_err(|e| Error::Decode(format!("{}: value is not valid base64: {}", self.key, e)))
    }
}

/// Build export entries for every key, in key order.
pub fn export(map: &FlatMap) -> Vec<ExportEntry> {
    map.iter()
        .map(|(key, value)| ExportEntry::new(key, value))
        .collect()
}

/// Serialize entries as a tab-indented JSON array followed by a newline.
pub fn to_json(entries: &[ExportEntry]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    entries.serialize(&mut ser)?;
    out.push(b'\n');
    Ok(out)
}

/// Parse a dump back into a map.
pub fn decode_entries(json: &[u8]) -> Result<FlatMap> {
    let entries: Vec<ExportEntry> = serde_json::from_slice(json)?;
    let mut map = FlatMap::new();
    for entry in entries {
        let value = entry.decoded_value()?;
        map.insert(entry.key, value, "<dump>");
    }
    Ok(map)
}

/// Where the dump is written and whether it is compressed.
#[derive(Debug, Clone, Default)]
pub struct DumpTarget<'a> {
    pub output: Option<&'a Path>,
    pub gzip: bool,
}

impl DumpTarget<'_> {
    /// Compress when asked to or when the output file name ends in `.gz`.
    pub fn should_compress(&self) -> bool {
        if self.gzip {
            return true;
        }
        self.output
            .is_some_and(|path| path.extension().is_some_and(|ext| ext == "gz"))
    }

    /// True when the dump goes to the process output stream.
    pub fn is_stdout(&self) -> bool {
        self.output.is_none()
    }

    /// Write `bytes` to the configured destination.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        self.write_to(std::io::stdout().lock(), bytes)
    }

    /// Same as [`DumpTarget::write`], with `stdout` standing in for the
    /// process output stream.
    pub fn write_to<W: Write>(&self, stdout: W, bytes: &[u8]) -> Result<()> {
        let compress = self.should_compress();
        match self.output {
            Some(path) => {
                let file = std::fs::File::create(path).map_err(|e| Error::access(path, e))?;
                write_maybe_gzip(file, bytes, compress)?;
            }
            None => write_maybe_gzip(stdout, bytes, compress)?,
        }
        Ok(())
    }
}

fn write_maybe_gzip<W: Write>(mut writer: W, bytes: &[u8], compress: bool) -> std::io::Result<()> {
    if compress {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let mut encoder = GzEncoder::new(writer, Compression::default());
        encoder.write_all(bytes)?;
        encoder.finish()?.flush()
    } else {
        writer.write_all(bytes)?;
        writer.flush()
    }
}
