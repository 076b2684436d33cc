//! Settings type shared by the config tiers and the command line.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::flatten::DEFAULT_GLUE;
use crate::sync::DEFAULT_CONCURRENCY;

/// Effective run settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Key namespace root in the store.
    pub prefix: String,

    /// Separator used when collapsing a sequence of scalars.
    pub glue: String,

    /// Print the flattened keys in `consul kv import` format.
    pub dump: bool,

    /// Reconcile the store with the flattened keys.
    pub sync: bool,

    /// Compute and print the sync plan without applying it.
    pub dry_run: bool,

    /// Store requests kept in flight while syncing.
    pub concurrency: usize,

    /// Dump destination; stdout when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,

    /// Gzip the dump.
    pub gzip: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            glue: DEFAULT_GLUE.to_string(),
            dump: false,
            sync: false,
            dry_run: false,
            concurrency: DEFAULT_CONCURRENCY,
            output: None,
            gzip: false,
        }
    }
}

impl Settings {
    /// A dry run only means something when syncing.
    pub fn dry_run_ignored(&self) -> bool {
        self.dry_run && !self.sync
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.glue, "\n");
        assert_eq!(s.concurrency, 8);
        assert!(s.prefix.is_empty());
        assert!(!s.dump && !s.sync && !s.dry_run);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let s: Settings = serde_yaml::from_str("prefix: svc\nglue: \",\"\n").unwrap();
        assert_eq!(s.prefix, "svc");
        assert_eq!(s.glue, ",");
        assert_eq!(s.concurrency, 8);
    }

    #[test]
    fn test_dry_run_without_sync_is_ignored() {
        let mut s = Settings {
            dry_run: true,
            ..Settings::default()
        };
        assert!(s.dry_run_ignored());
        s.sync = true;
        assert!(!s.dry_run_ignored());
        assert!(!Settings::default().dry_run_ignored());
    }
}
