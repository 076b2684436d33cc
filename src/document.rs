//! Format-independent document tree.
//!
//! JSON and YAML sources both decode through the same `Deserialize` impl, so
//! the flattener sees one shape no matter where the data came from. YAML
//! goes through `serde_yaml::Value` first so tags and merge keys are settled
//! before that. Mapping
//! order is the order keys first appear in the source, and integers stay
//! distinct from floats.

use std::fmt;
use std::io::Read;

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_yaml::Value as YamlValue;
use tracing::warn;

use crate::error::{Error, Result};
use crate::keys::Format;

/// A node of a parsed document.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// Key/value pairs in source order. Later duplicates replace earlier ones
    /// in place (YAML rejects duplicates before this point).
    Mapping(Vec<(String, Document)>),
    Sequence(Vec<Document>),
    Scalar(Scalar),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    String(String),
}

impl Document {
    /// The document contributed by formats that are recognised but not parsed.
    pub fn empty() -> Self {
        Document::Mapping(Vec::new())
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Document::Scalar(_))
    }
}

impl Scalar {
    /// Canonical byte rendering stored in the key-value store.
    ///
    /// Booleans are `true`/`false`, numbers use their shortest decimal form,
    /// null is empty and strings are verbatim.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => Ok(()),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Integer(i) => write!(f, "{}", i),
            Scalar::Unsigned(u) => write!(f, "{}", u),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::String(s) => f.write_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DocumentVisitor)
    }
}

struct DocumentVisitor;

impl<'de> Visitor<'de> for DocumentVisitor {
    type Value = Document;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping, a sequence or a scalar")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Document, E> {
        Ok(Document::Scalar(Scalar::Null))
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Document, E> {
        Ok(Document::Scalar(Scalar::Null))
    }

    fn visit_some<D>(self, deserializer: D) -> std::result::Result<Document, D::Error>
    where
        D: Deserializer<'de>,
    {
        Document::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Document, E> {
        Ok(Document::Scalar(Scalar::Bool(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Document, E> {
        Ok(Document::Scalar(Scalar::Integer(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Document, E> {
        // Keep everything that fits in i64 as a plain integer.
        match i64::try_from(v) {
            Ok(i) => Ok(Document::Scalar(Scalar::Integer(i))),
            Err(_) => Ok(Document::Scalar(Scalar::Unsigned(v))),
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Document, E> {
        Ok(Document::Scalar(Scalar::Float(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Document, E> {
        Ok(Document::Scalar(Scalar::String(v.to_string())))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Document, E> {
        Ok(Document::Scalar(Scalar::String(v)))
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Document, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Document>()? {
            items.push(item);
        }
        Ok(Document::Sequence(items))
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<Document, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut entries: Vec<(String, Document)> = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some(MapKey(key)) = map.next_key::<MapKey>()? {
            let value = map.next_value::<Document>()?;
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => entries.push((key, value)),
            }
        }
        Ok(Document::Mapping(entries))
    }
}

/// Mapping key that accepts any scalar and keeps its textual form. YAML
/// allows `1: one` or `true: yes`; those keys become `"1"` and `"true"`.
struct MapKey(String);

impl<'de> Deserialize<'de> for MapKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(MapKeyVisitor)
    }
}

struct MapKeyVisitor;

impl<'de> Visitor<'de> for MapKeyVisitor {
    type Value = MapKey;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a scalar mapping key")
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<MapKey, E> {
        Ok(MapKey(String::new()))
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<MapKey, E> {
        Ok(MapKey(v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<MapKey, E> {
        Ok(MapKey(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<MapKey, E> {
        Ok(MapKey(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<MapKey, E> {
        Ok(MapKey(v.to_string()))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<MapKey, E> {
        Ok(MapKey(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<MapKey, E> {
        Ok(MapKey(v))
    }
}

/// Parse `source` as `format` into a document.
///
/// `source_name` labels parse errors. Formats that are recognised but not
/// implemented yield an empty mapping.
pub fn normalize<R: Read>(source: R, format: Format, source_name: &str) -> Result<Document> {
    match format {
        Format::Json => serde_json::from_reader(source).map_err(|e| match e.classify() {
            serde_json::error::Category::Io => Error::Io(std::io::Error::other(e)),
            _ => Error::json_parse(source_name, &e),
        }),
        Format::Yaml => {
            let mut documents = serde_yaml::Deserializer::from_reader(source);
            let Some(first) = documents.next() else {
                return Ok(Document::Scalar(Scalar::Null));
            };
            let doc = yaml_document(first).map_err(|e| Error::yaml_parse(source_name, &e))?;
            if documents.next().is_some() {
                warn!(source = %source_name, "Only the first YAML document is read");
            }
            Ok(doc)
        }
        Format::Properties | Format::Ini => Ok(Document::empty()),
    }
}

/// Decode one YAML document with tags dropped and `<<` merge keys resolved.
fn yaml_document(de: serde_yaml::Deserializer<'_>) -> std::result::Result<Document, serde_yaml::Error> {
    let mut value = untag(YamlValue::deserialize(de)?);
    value.apply_merge()?;
    Document::deserialize(value)
}

/// Keep the value under any tag, `!vault path` reads as `path`.
fn untag(value: YamlValue) -> YamlValue {
    match value {
        YamlValue::Tagged(tagged) => untag(tagged.value),
        YamlValue::Sequence(items) => YamlValue::Sequence(items.into_iter().map(untag).collect()),
        YamlValue::Mapping(entries) => {
            YamlValue::Mapping(entries.into_iter().map(|(k, v)| (untag(k), untag(v))).collect())
        }
        other => other,
    }
}

/// Convenience wrapper over [`normalize`] for in-memory sources.
pub fn normalize_str(source: &str, format: Format) -> Result<Document> {
    normalize(source.as_bytes(), format, "<string>")
}
