use crate::consts::{META_SUFFIX, META_VERSION};
use crate::errors::{PlotError, Result};
use crate::layout::StoreLayout;
use crate::utils::with_suffix;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sidecar written next to a store as `<store>.meta.json`.
///
/// The store file itself carries no header; readers need this (or an explicit
/// [`StoreLayout`]) to know the block geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub version: u16,
    pub layout: StoreLayout,
    /// Recorded so a reader built with a different prefix rule fails loudly.
    pub prefix_bytes: usize,
    #[serde(default)]
    pub generated: u64,
    #[serde(default)]
    pub stored: u64,
    #[serde(default)]
    pub dropped: u64,
    #[serde(default = "one")]
    pub num_batches: u64,
    #[serde(default)]
    pub start_nonce: u64,
    #[serde(default)]
    pub created_unix: i64,
}

fn one() -> u64 { 1 }

impl StoreMeta {
    pub fn new(layout: StoreLayout) -> Self {
        Self {
            version: META_VERSION,
            layout,
            prefix_bytes: layout.prefix_bytes(),
            generated: 0,
            stored: 0,
            dropped: 0,
            num_batches: 1,
            start_nonce: 0,
            created_unix: time::OffsetDateTime::now_utc().unix_timestamp(),
        }
    }

    pub fn path_for(store: &Path) -> PathBuf { with_suffix(store, META_SUFFIX) }

    pub fn load(store: &Path) -> Result<Self> {
        let s = fs::read_to_string(Self::path_for(store))?;
        let m: StoreMeta = serde_json::from_str(&s)?;
        m.check()?;
        Ok(m)
    }

    pub fn save_atomic(&self, store: &Path) -> Result<()> {
        let p = Self::path_for(store);
        let tmp = with_suffix(&p, ".tmp");
        let mut f = fs::File::create(&tmp)?;
        f.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
        f.sync_all()?;
        drop(f);
        fs::rename(&tmp, &p)?;
        Ok(())
    }

    fn check(&self) -> Result<()> {
        if self.version != META_VERSION {
            return Err(PlotError::LayoutMismatch(format!("unsupported meta version {}", self.version)));
        }
        self.layout.validate()?;
        let p = self.layout.prefix_bytes();
        if p != self.prefix_bytes {
            return Err(PlotError::LayoutMismatch(format!(
                "store was placed with {}-byte prefixes, this build computes {p}",
                self.prefix_bytes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_load_and_reject_prefix_drift() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("plot.bin");
        let mut m = StoreMeta::new(StoreLayout::new(10, 6, 300, 12));
        m.stored = 7;
        m.save_atomic(&store).unwrap();
        assert!(dir.path().join("plot.bin.meta.json").exists());
        assert_eq!(StoreMeta::load(&store).unwrap(), m);

        m.prefix_bytes = 1;
        m.save_atomic(&store).unwrap();
        assert!(matches!(StoreMeta::load(&store).unwrap_err(), PlotError::LayoutMismatch(_)));
    }
}
