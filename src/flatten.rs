//! Flattening of document trees into `/`-joined keys.
//!
//! Scalars become one entry each. A sequence made only of scalars collapses
//! into one entry whose value is the rendered items joined with the glue
//! string. A sequence holding any mapping or sequence is expanded instead,
//! with each element under its decimal index.

use std::collections::BTreeMap;

use tracing::{trace, warn};

use crate::document::Document;
use crate::keys;

/// Default glue between collapsed sequence items.
pub const DEFAULT_GLUE: &str = "\n";

/// A key written twice. The later value is the one kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub key: String,
    /// Label of the source that wrote the surviving value.
    pub source: String,
}

/// What happened to a single write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The key already held a value, which was replaced.
    Replaced { previous: Vec<u8> },
    /// Empty keys cannot be stored; the write was dropped.
    RejectedEmptyKey,
}

/// The accumulation map every flatten call writes into.
///
/// Last write wins on collisions, and every collision is both logged and
/// recorded so callers can report it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatMap {
    entries: BTreeMap<String, Vec<u8>>,
    collisions: Vec<Collision>,
    rejected: Vec<String>,
}

impl FlatMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key` on behalf of `source`.
    pub fn insert(&mut self, key: String, value: Vec<u8>, source: &str) -> InsertOutcome {
        if key.is_empty() {
            warn!(source = %source, "Document root is a bare value with no key; skipping");
            self.rejected.push(source.to_string());
            return InsertOutcome::RejectedEmptyKey;
        }

        match self.entries.insert(key.clone(), value) {
            None => InsertOutcome::Inserted,
            Some(previous) => {
                warn!(key = %key, source = %source, "Key already defined; overwriting earlier value");
                self.collisions.push(Collision {
                    key,
                    source: source.to_string(),
                });
                InsertOutcome::Replaced { previous }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn entries(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.entries
    }

    pub fn collisions(&self) -> &[Collision] {
        &self.collisions
    }

    /// Sources whose root document was a bare scalar.
    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }
}

impl FromIterator<(String, Vec<u8>)> for FlatMap {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        let mut map = FlatMap::new();
        for (key, value) in iter {
            map.insert(key, value, "<iter>");
        }
        map
    }
}

/// Walks documents and writes their leaves into a [`FlatMap`].
#[derive(Debug, Clone)]
pub struct Flattener {
    glue: String,
}

impl Default for Flattener {
    fn default() -> Self {
        Self::new(DEFAULT_GLUE)
    }
}

impl Flattener {
    pub fn new(glue: impl Into<String>) -> Self {
        Self { glue: glue.into() }
    }

    pub fn glue(&self) -> &str {
        &self.glue
    }

    /// Flatten `doc` under `prefix` into `into`. Returns the number of
    /// entries written, collisions included.
    pub fn flatten(&self, doc: &Document, prefix: &[String], into: &mut FlatMap, source: &str) -> usize {
        let mut path = prefix.to_vec();
        self.walk(doc, &mut path, into, source)
    }

    fn walk(&self, doc: &Document, path: &mut Vec<String>, into: &mut FlatMap, source: &str) -> usize {
        match doc {
            Document::Mapping(entries) => {
                let mut written = 0;
                for (key, value) in entries {
                    path.push(key.clone());
                    written += self.walk(value, path, into, source);
                    path.pop();
                }
                written
            }
            Document::Sequence(items) if items.iter().all(Document::is_scalar) => {
                let joined = items
                    .iter()
                    .filter_map(|item| match item {
                        Document::Scalar(s) => Some(s.to_string()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(&self.glue);
                self.emit(path, joined.into_bytes(), into, source)
            }
            Document::Sequence(items) => {
                let mut written = 0;
                for (index, item) in items.iter().enumerate() {
                    path.push(index.to_string());
                    written += self.walk(item, path, into, source);
                    path.pop();
                }
                written
            }
            Document::Scalar(scalar) => self.emit(path, scalar.to_bytes(), into, source),
        }
    }

    fn emit(&self, path: &[String], value: Vec<u8>, into: &mut FlatMap, source: &str) -> usize {
        let key = keys::join(path);
        trace!(key = %key, bytes = value.len(), "Flattened entry");
        match into.insert(key, value, source) {
            InsertOutcome::RejectedEmptyKey => 0,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Scalar, normalize_str};
    use crate::keys::Format;

    fn json(src: &str) -> Document {
        normalize_str(src, Format::Json).unwrap()
    }

    fn seg(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn value<'a>(map: &'a FlatMap, key: &str) -> &'a str {
        std::str::from_utf8(map.get(key).unwrap()).unwrap()
    }

    #[test]
    fn test_nested_mapping() {
        let mut map = FlatMap::new();
        let n = Flattener::default().flatten(
            &json(r#"{"db": {"host": "x", "port": 5432}, "debug": false}"#),
            &seg(&["svc"]),
            &mut map,
            "test",
        );
        assert_eq!(n, 3);
        assert_eq!(value(&map, "svc/db/host"), "x");
        assert_eq!(value(&map, "svc/db/port"), "5432");
        assert_eq!(value(&map, "svc/debug"), "false");
    }

    #[test]
    fn test_scalar_sequence_collapses_with_glue() {
        let mut map = FlatMap::new();
        Flattener::new("-").flatten(&json(r#"["a", "b", "c"]"#), &seg(&["k"]), &mut map, "test");
        assert_eq!(map.len(), 1);
        assert_eq!(value(&map, "k"), "a-b-c");
    }

    #[test]
    fn test_default_glue_is_newline() {
        let mut map = FlatMap::new();
        Flattener::default().flatten(&json(r#"{"k": [1, true, null, "x"]}"#), &[], &mut map, "test");
        assert_eq!(value(&map, "k"), "1\ntrue\n\nx");
    }

    #[test]
    fn test_mixed_sequence_expands_by_index() {
        let mut map = FlatMap::new();
        Flattener::new("-").flatten(&json(r#"[{"x": 1}, 2]"#), &seg(&["k"]), &mut map, "test");
        assert_eq!(map.len(), 2);
        assert_eq!(value(&map, "k/0/x"), "1");
        assert_eq!(value(&map, "k/1"), "2");
    }

    #[test]
    fn test_nested_scalar_sequences_inside_mixed_sequence() {
        let mut map = FlatMap::new();
        Flattener::new(",").flatten(&json(r#"{"k": [[1, 2], [3]]}"#), &[], &mut map, "test");
        assert_eq!(value(&map, "k/0"), "1,2");
        assert_eq!(value(&map, "k/1"), "3");
    }

    #[test]
    fn test_empty_sequence_is_empty_value() {
        let mut map = FlatMap::new();
        Flattener::default().flatten(&json(r#"{"k": []}"#), &[], &mut map, "test");
        assert_eq!(map.get("k"), Some(&b""[..]));
    }

    #[test]
    fn test_empty_mapping_writes_nothing() {
        let mut map = FlatMap::new();
        let n = Flattener::default().flatten(&json(r#"{"k": {}}"#), &[], &mut map, "test");
        assert_eq!(n, 0);
        assert!(map.is_empty());
    }

    #[test]
    fn test_bare_root_scalar_is_rejected() {
        let mut map = FlatMap::new();
        let n = Flattener::default().flatten(&Document::Scalar(Scalar::Integer(7)), &[], &mut map, "stdin");
        assert_eq!(n, 0);
        assert!(map.is_empty());
        assert_eq!(map.rejected(), &["stdin".to_string()]);
    }

    #[test]
    fn test_bare_root_scalar_with_prefix_is_kept() {
        let mut map = FlatMap::new();
        Flattener::default().flatten(
            &Document::Scalar(Scalar::String("v".into())),
            &seg(&["svc", "flag"]),
            &mut map,
            "test",
        );
        assert_eq!(value(&map, "svc/flag"), "v");
    }

    #[test]
    fn test_collision_last_write_wins_and_is_recorded() {
        let mut map = FlatMap::new();
        let f = Flattener::default();
        f.flatten(&json(r#"{"host": "first"}"#), &seg(&["app"]), &mut map, "a.json");
        f.flatten(&json(r#"{"host": "second"}"#), &seg(&["app"]), &mut map, "b.yaml");
        assert_eq!(value(&map, "app/host"), "second");
        assert_eq!(
            map.collisions(),
            &[Collision {
                key: "app/host".to_string(),
                source: "b.yaml".to_string()
            }]
        );
    }

    #[test]
    fn test_insert_reports_previous_value() {
        let mut map = FlatMap::new();
        assert_eq!(map.insert("a".into(), b"1".to_vec(), "x"), InsertOutcome::Inserted);
        assert_eq!(
            map.insert("a".into(), b"2".to_vec(), "y"),
            InsertOutcome::Replaced {
                previous: b"1".to_vec()
            }
        );
    }

    #[test]
    fn test_flatten_is_deterministic() {
        let doc = json(r#"{"b": [1, {"c": [true, 2.5]}], "a": {"x": null}}"#);
        let f = Flattener::new("|");
        let mut first = FlatMap::new();
        let mut second = FlatMap::new();
        f.flatten(&doc, &seg(&["p"]), &mut first, "t");
        f.flatten(&doc, &seg(&["p"]), &mut second, "t");
        assert_eq!(first, second);
        assert_eq!(value(&first, "p/b/1/c"), "true|2.5");
        assert_eq!(value(&first, "p/a/x"), "");
    }
}
