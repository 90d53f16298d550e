//! Per-folder analysis cache.
//!
//! One CSV table per scanned folder with the columns
//! `path, mtime, size, hash, prob_spring, prob_summer, prob_autumn, prob_winter, predicted_label`.
//! A `.meta` sidecar records the schema version and the [`AnalysisKey`] the
//! rows were computed under. Rows whose mtime or size no longer match the file
//! are ignored. An unreadable table, or one written under a different schema
//! or different analysis settings, is discarded as a whole.
//!
//! A cache is opened for the lifetime of one scan. Opening takes an exclusive
//! lock file next to the table, so a second scan of the same folder fails
//! with [`CacheError::Locked`] instead of racing on the table.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{CacheConfig, Config};
use crate::error::CacheError;
use crate::pipeline::hash::Fingerprint;
use crate::types::{Season, SeasonProbabilities};

/// Bumped whenever the table layout or value semantics change.
pub const SCHEMA_VERSION: u32 = 1;

const COLUMNS: [&str; 9] = [
    "path",
    "mtime",
    "size",
    "hash",
    "prob_spring",
    "prob_summer",
    "prob_autumn",
    "prob_winter",
    "predicted_label",
];

/// Settings that determine what a cached hash or distribution means.
///
/// Fingerprints of different sizes cannot be compared, and probabilities
/// depend on the model and its prompts, so a table is only reused under the
/// key it was written with.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisKey {
    pub hash_size: u32,
    pub model: String,
    pub image_size: u32,
    pub prompt_template: String,
    pub logit_scale: f64,
}

impl AnalysisKey {
    pub fn from_config(config: &Config) -> Self {
        Self {
            hash_size: config.duplicates.hash_size,
            model: config.embedding.model.clone(),
            image_size: config.embedding.image_size,
            prompt_template: config.classify.prompt_template.clone(),
            logit_scale: config.classify.logit_scale,
        }
    }

    /// Sidecar contents. Strings are quoted so a template cannot break a line.
    fn meta(&self) -> String {
        format!(
            "schema_version={}\nhash_size={}\nmodel={:?}\nimage_size={}\nprompt_template={:?}\nlogit_scale={}\n",
            SCHEMA_VERSION,
            self.hash_size,
            self.model,
            self.image_size,
            self.prompt_template,
            self.logit_scale
        )
    }
}

impl Default for AnalysisKey {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Persisted analysis of one file.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub modified_ns: i64,
    pub size: u64,
    pub hash: Option<Fingerprint>,
    pub probabilities: Option<SeasonProbabilities>,
}

impl CacheEntry {
    fn is_fresh(&self, modified_ns: i64, size: u64) -> bool {
        self.modified_ns == modified_ns && self.size == size
    }
}

/// On-disk row. Column names are the field names.
#[derive(Debug, Serialize, Deserialize)]
struct CacheRow {
    path: String,
    mtime: i64,
    size: u64,
    hash: Option<String>,
    prob_spring: Option<f64>,
    prob_summer: Option<f64>,
    prob_autumn: Option<f64>,
    prob_winter: Option<f64>,
    predicted_label: Option<Season>,
}

impl From<&CacheEntry> for CacheRow {
    fn from(entry: &CacheEntry) -> Self {
        let probs = entry.probabilities;
        Self {
            path: entry.path.to_string_lossy().into_owned(),
            mtime: entry.modified_ns,
            size: entry.size,
            hash: entry.hash.as_ref().map(|h| h.as_str().to_string()),
            prob_spring: probs.map(|p| p.spring),
            prob_summer: probs.map(|p| p.summer),
            prob_autumn: probs.map(|p| p.autumn),
            prob_winter: probs.map(|p| p.winter),
            predicted_label: probs.map(|p| p.top().0),
        }
    }
}

impl CacheRow {
    /// `None` when the row is internally inconsistent.
    fn into_entry(self) -> Option<CacheEntry> {
        let hash = match self.hash {
            Some(encoded) => Some(Fingerprint::from_encoded(&encoded)?),
            None => None,
        };
        let probabilities = match (
            self.prob_spring,
            self.prob_summer,
            self.prob_autumn,
            self.prob_winter,
        ) {
            (Some(spring), Some(summer), Some(autumn), Some(winter)) => {
                let probs = SeasonProbabilities {
                    spring,
                    summer,
                    autumn,
                    winter,
                };
                if !probs.is_well_formed(1e-6) {
                    return None;
                }
                Some(probs)
            }
            (None, None, None, None) => None,
            _ => return None,
        };
        Some(CacheEntry {
            path: PathBuf::from(self.path),
            modified_ns: self.mtime,
            size: self.size,
            hash,
            probabilities,
        })
    }
}

/// Exclusive claim on a folder's cache; released on drop.
#[derive(Debug)]
struct CacheLock {
    path: PathBuf,
}

impl CacheLock {
    fn acquire(path: PathBuf) -> Result<Self, CacheError> {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // Owner pid, for whoever has to clear a stale lock by hand.
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(CacheError::Locked(path))
            }
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Failed to release cache lock {:?}: {}", self.path, e);
        }
    }
}

/// Analysis cache for one folder, scoped to one scan.
#[derive(Debug)]
pub struct AnalysisCache {
    table_path: PathBuf,
    key: AnalysisKey,
    entries: HashMap<PathBuf, CacheEntry>,
    dirty: bool,
    /// `None` when caching is disabled
    lock: Option<CacheLock>,
}

impl AnalysisCache {
    /// Open the cache for `folder`, taking the folder lock.
    ///
    /// A missing, corrupt or outdated table, or one written under another
    /// `key`, yields an empty cache.
    pub fn open(folder: &Path, config: &CacheConfig, key: AnalysisKey) -> Result<Self, CacheError> {
        let table_path = folder.join(&config.file_name);
        if !config.enabled {
            return Ok(Self::disabled(table_path));
        }

        let lock = CacheLock::acquire(folder.join(format!("{}.lock", config.file_name)))?;
        let entries = match load_table(&table_path, &key) {
            Ok(entries) => entries,
            Err(Discard::SettingsChanged) => {
                tracing::info!(
                    "Analysis settings changed since {:?} was written, recomputing",
                    table_path
                );
                HashMap::new()
            }
            Err(Discard::Unreadable(reason)) => {
                tracing::debug!("Discarding analysis cache {:?}: {}", table_path, reason);
                HashMap::new()
            }
        };
        tracing::debug!(
            "Opened analysis cache {:?} ({} entries)",
            table_path,
            entries.len()
        );

        Ok(Self {
            table_path,
            key,
            entries,
            dirty: false,
            lock: Some(lock),
        })
    }

    /// A cache that never hits and never writes.
    pub fn disabled(table_path: PathBuf) -> Self {
        Self {
            table_path,
            key: AnalysisKey::default(),
            entries: HashMap::new(),
            dirty: false,
            lock: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.lock.is_some()
    }

    pub fn table_path(&self) -> &Path {
        &self.table_path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `path`, only if it was recorded for the same mtime and size.
    pub fn get(&self, path: &Path, modified_ns: i64, size: u64) -> Option<&CacheEntry> {
        self.entries
            .get(path)
            .filter(|entry| entry.is_fresh(modified_ns, size))
    }

    /// Record an entry, replacing any previous one for the same path.
    pub fn insert(&mut self, entry: CacheEntry) {
        if !self.is_enabled() {
            return;
        }
        self.entries.insert(entry.path.clone(), entry);
        self.dirty = true;
    }

    /// Drop entries for files that are no longer part of the folder.
    pub fn retain_paths(&mut self, live: &HashSet<PathBuf>) {
        let before = self.entries.len();
        self.entries.retain(|path, _| live.contains(path));
        if self.entries.len() != before {
            self.dirty = true;
        }
    }

    /// Persist changes atomically and release the folder lock.
    pub fn close(mut self) -> Result<(), CacheError> {
        if self.is_enabled() && self.dirty {
            self.write_table()?;
            self.dirty = false;
        }
        Ok(())
    }

    fn write_table(&self) -> Result<(), CacheError> {
        let dir = self
            .table_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let io_err = |source| CacheError::Io {
            path: self.table_path.clone(),
            source,
        };

        let mut rows: Vec<&CacheEntry> = self.entries.values().collect();
        rows.sort_by(|a, b| a.path.cmp(&b.path));

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        {
            let mut writer = csv::Writer::from_writer(&mut tmp);
            if rows.is_empty() {
                writer.write_record(COLUMNS)?;
            }
            for entry in rows {
                writer.serialize(CacheRow::from(entry))?;
            }
            writer.flush().map_err(io_err)?;
        }
        tmp.persist(&self.table_path).map_err(|e| io_err(e.error))?;

        std::fs::write(meta_path(&self.table_path), self.key.meta()).map_err(io_err)?;

        tracing::debug!(
            "Wrote analysis cache {:?} ({} entries)",
            self.table_path,
            self.entries.len()
        );
        Ok(())
    }
}

fn meta_path(table_path: &Path) -> PathBuf {
    table_path.with_extension("meta")
}

/// Why a stored table is not reused.
enum Discard {
    SettingsChanged,
    Unreadable(String),
}

impl From<csv::Error> for Discard {
    fn from(e: csv::Error) -> Self {
        Discard::Unreadable(e.to_string())
    }
}

/// Read the table. Any problem discards the whole table.
fn load_table(table_path: &Path, key: &AnalysisKey) -> Result<HashMap<PathBuf, CacheEntry>, Discard> {
    if !table_path.exists() {
        return Ok(HashMap::new());
    }

    let meta = std::fs::read_to_string(meta_path(table_path))
        .map_err(|e| Discard::Unreadable(format!("missing schema sidecar: {e}")))?;
    let schema = format!("schema_version={}", SCHEMA_VERSION);
    if !meta.lines().any(|line| line.trim() == schema) {
        return Err(Discard::Unreadable(format!("schema mismatch ({:?})", meta.trim())));
    }
    let expected = key.meta();
    if meta.lines().map(str::trim).ne(expected.lines()) {
        return Err(Discard::SettingsChanged);
    }

    let mut reader = csv::Reader::from_path(table_path)?;
    let headers = reader.headers()?;
    if headers.iter().ne(COLUMNS.iter().copied()) {
        return Err(Discard::Unreadable(format!("unexpected columns {:?}", headers)));
    }

    let mut entries = HashMap::new();
    for row in reader.deserialize::<CacheRow>() {
        let entry = row?
            .into_entry()
            .ok_or_else(|| Discard::Unreadable("inconsistent row".to_string()))?;
        entries.insert(entry.path.clone(), entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &Path, with_probs: bool) -> CacheEntry {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_fn(16, 16, |x, y| {
            image::Rgb([(x * 16) as u8, (y * 16) as u8, 0])
        }));
        CacheEntry {
            path: path.to_path_buf(),
            modified_ns: 1_700_000_000_000_000_000,
            size: 2048,
            hash: Some(crate::pipeline::hash::Hasher::default().fingerprint(&img)),
            probabilities: with_probs
                .then(|| SeasonProbabilities::from_array([0.1, 0.2, 0.3, 0.4])),
        }
    }

    #[test]
    fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::default();
        let a = entry(&dir.path().join("a.jpg"), true);
        let b = entry(&dir.path().join("b.jpg"), false);

        let mut cache = AnalysisCache::open(dir.path(), &config, AnalysisKey::default()).unwrap();
        assert!(cache.is_empty());
        cache.insert(a.clone());
        cache.insert(b.clone());
        cache.close().unwrap();

        let header = std::fs::read_to_string(dir.path().join(&config.file_name)).unwrap();
        assert!(header.starts_with(
            "path,mtime,size,hash,prob_spring,prob_summer,prob_autumn,prob_winter,predicted_label"
        ));

        let cache = AnalysisCache::open(dir.path(), &config, AnalysisKey::default()).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&a.path, a.modified_ns, a.size), Some(&a));
        assert_eq!(cache.get(&b.path, b.modified_ns, b.size), Some(&b));
    }

    #[test]
    fn test_stale_entries_miss() {
        let dir = tempfile::tempdir().unwrap();
        let a = entry(&dir.path().join("a.jpg"), true);
        let mut cache = AnalysisCache::open(dir.path(), &CacheConfig::default(), AnalysisKey::default()).unwrap();
        cache.insert(a.clone());

        assert!(cache.get(&a.path, a.modified_ns + 1, a.size).is_none());
        assert!(cache.get(&a.path, a.modified_ns, a.size + 1).is_none());
        assert!(cache.get(&a.path, a.modified_ns, a.size).is_some());
    }

    #[test]
    fn test_second_open_is_locked_until_close() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::default();
        let first = AnalysisCache::open(dir.path(), &config, AnalysisKey::default()).unwrap();

        let err = AnalysisCache::open(dir.path(), &config, AnalysisKey::default()).unwrap_err();
        assert!(matches!(err, CacheError::Locked(_)));

        first.close().unwrap();
        assert!(AnalysisCache::open(dir.path(), &config, AnalysisKey::default()).is_ok());
    }

    #[test]
    fn test_drop_releases_lock_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::default();
        {
            let mut cache = AnalysisCache::open(dir.path(), &config, AnalysisKey::default()).unwrap();
            cache.insert(entry(&dir.path().join("a.jpg"), true));
        }
        assert!(!dir.path().join(&config.file_name).exists());
        let cache = AnalysisCache::open(dir.path(), &config, AnalysisKey::default()).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_corrupt_table_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::default();
        let table = dir.path().join(&config.file_name);
        std::fs::write(&table, "path,mtime\n\"unterminated,1\n").unwrap();
        std::fs::write(meta_path(&table), AnalysisKey::default().meta()).unwrap();

        let cache = AnalysisCache::open(dir.path(), &config, AnalysisKey::default()).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_schema_mismatch_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::default();
        let mut cache = AnalysisCache::open(dir.path(), &config, AnalysisKey::default()).unwrap();
        cache.insert(entry(&dir.path().join("a.jpg"), true));
        cache.close().unwrap();

        let table = dir.path().join(&config.file_name);
        std::fs::write(meta_path(&table), "schema_version=0\n").unwrap();
        let cache = AnalysisCache::open(dir.path(), &config, AnalysisKey::default()).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_changed_analysis_settings_discard_table() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::default();
        let mut cache = AnalysisCache::open(dir.path(), &config, AnalysisKey::default()).unwrap();
        cache.insert(entry(&dir.path().join("a.jpg"), true));
        cache.close().unwrap();

        let same = AnalysisCache::open(dir.path(), &config, AnalysisKey::default()).unwrap();
        assert_eq!(same.len(), 1);
        same.close().unwrap();

        let resized = AnalysisKey {
            hash_size: 16,
            ..AnalysisKey::default()
        };
        assert!(AnalysisCache::open(dir.path(), &config, resized)
            .unwrap()
            .is_empty());

        let reworded = AnalysisKey {
            prompt_template: "a {season} landscape\nat dusk".into(),
            ..AnalysisKey::default()
        };
        assert!(AnalysisCache::open(dir.path(), &config, reworded)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_retain_paths_prunes_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::default();
        let a = entry(&dir.path().join("a.jpg"), true);
        let b = entry(&dir.path().join("b.jpg"), true);
        let mut cache = AnalysisCache::open(dir.path(), &config, AnalysisKey::default()).unwrap();
        cache.insert(a.clone());
        cache.insert(b.clone());

        let live: HashSet<PathBuf> = [a.path.clone()].into_iter().collect();
        cache.retain_paths(&live);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&b.path, b.modified_ns, b.size).is_none());
    }

    #[test]
    fn test_disabled_cache_is_inert() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let mut cache = AnalysisCache::open(dir.path(), &config, AnalysisKey::default()).unwrap();
        assert!(!cache.is_enabled());
        cache.insert(entry(&dir.path().join("a.jpg"), true));
        assert!(cache.is_empty());
        cache.close().unwrap();
        assert!(!dir.path().join(&config.file_name).exists());
        // No lock is taken either.
        assert!(AnalysisCache::open(dir.path(), &config, AnalysisKey::default()).is_ok());
    }
}
