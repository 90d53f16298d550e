//! Batch relocation of classified images into season folders.
//!
//! Each result lands in `<root>/<season>/` (or `<root>/unknown/` when unknown
//! results are included), where `root` is the output folder or the scanned
//! folder. Files are handled independently and every failure is recorded in
//! the summary instead of aborting the batch.
//!
//! Destination names never overwrite: if `name.ext` is taken, `name (1).ext`,
//! `name (2).ext`, ... are tried in order. A move never removes the source
//! before the destination is fully written: it either hard-links (atomic,
//! fails on an existing name) or copies into a temporary file that is synced
//! and then persisted without clobbering.
//!
//! In copy mode an [`Annotator`] may be attached; each destination then holds
//! a captioned re-encoding of the source instead of its bytes.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::annotate::Annotator;
use crate::error::{ConfigError, ReorganizeError};
use crate::types::ClassificationResult;

/// Upper bound on `name (n).ext` candidates tried per file.
const MAX_SUFFIX: u32 = 10_000;

/// How files are relocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReorganizeMode {
    /// Relocate; the source is removed once the destination is written
    #[default]
    Move,
    /// Duplicate; the source is never touched
    Copy,
}

impl ReorganizeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReorganizeMode::Move => "move",
            ReorganizeMode::Copy => "copy",
        }
    }

    fn past_tense(self) -> &'static str {
        match self {
            ReorganizeMode::Move => "Moved",
            ReorganizeMode::Copy => "Copied",
        }
    }
}

impl fmt::Display for ReorganizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReorganizeMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "move" => Ok(ReorganizeMode::Move),
            "copy" => Ok(ReorganizeMode::Copy),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

/// Counts for one reorganize batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReorganizeSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Unknown results left in place, and files already at their destination
    pub skipped: usize,
    /// One message per failed file
    pub errors: Vec<String>,
    pub message: String,
}

enum Placement {
    Placed(PathBuf),
    AlreadyInPlace,
}

/// Executes reorganize batches.
#[derive(Debug, Clone, Copy)]
pub struct Reorganizer {
    mode: ReorganizeMode,
    include_unknown: bool,
    annotator: Option<Annotator>,
}

impl Reorganizer {
    pub fn new(mode: ReorganizeMode, include_unknown: bool) -> Self {
        Self {
            mode,
            include_unknown,
            annotator: None,
        }
    }

    /// Write captioned copies. Only valid in copy mode.
    pub fn with_annotator(mut self, annotator: Annotator) -> Result<Self, ConfigError> {
        if self.mode != ReorganizeMode::Copy {
            return Err(ConfigError::AnnotateRequiresCopy);
        }
        self.annotator = Some(annotator);
        Ok(self)
    }

    /// Relocate every result under `output_folder`, or under `folder` when unset.
    ///
    /// Existence is checked per file at the moment it is relocated.
    pub fn execute(
        &self,
        results: &[ClassificationResult],
        folder: &Path,
        output_folder: Option<&Path>,
    ) -> ReorganizeSummary {
        let root = output_folder.unwrap_or(folder);
        let mut summary = ReorganizeSummary::default();

        for result in results {
            if result.is_unknown && !self.include_unknown {
                tracing::debug!("Leaving unknown result in place: {:?}", result.path);
                summary.skipped += 1;
                continue;
            }

            let dest_dir = root.join(result.folder_name());
            match self.relocate(result, &dest_dir) {
                Ok(Placement::Placed(dest)) => {
                    tracing::debug!("{} {:?} -> {:?}", self.mode.past_tense(), result.path, dest);
                    summary.succeeded += 1;
                }
                Ok(Placement::AlreadyInPlace) => summary.skipped += 1,
                Err(e) => {
                    tracing::warn!("{e}");
                    summary.failed += 1;
                    summary.errors.push(e.to_string());
                }
            }
        }

        summary.message = format!(
            "{} {} files ({} failed, {} skipped)",
            self.mode.past_tense(),
            summary.succeeded,
            summary.failed,
            summary.skipped
        );
        tracing::info!("{}", summary.message);
        summary
    }

    fn relocate(
        &self,
        result: &ClassificationResult,
        dest_dir: &Path,
    ) -> Result<Placement, ReorganizeError> {
        let source = result.path.as_path();
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ReorganizeError::Io { path, source }
        };

        match source.try_exists() {
            Ok(true) => {}
            Ok(false) => return Err(ReorganizeError::SourceMissing(source.to_path_buf())),
            Err(e) => return Err(io_err(source)(e)),
        }
        let file_name = source
            .file_name()
            .ok_or_else(|| ReorganizeError::MissingFileName(source.to_path_buf()))?;

        fs::create_dir_all(dest_dir).map_err(io_err(dest_dir))?;
        if already_in(source, dest_dir) {
            return Ok(Placement::AlreadyInPlace);
        }

        let dest = match (self.mode, &self.annotator) {
            (ReorganizeMode::Copy, Some(annotator)) => {
                let bytes = annotator.encode(result)?;
                place_bytes(&bytes, dest_dir, file_name)?
            }
            (ReorganizeMode::Copy, None) => place_copy(source, dest_dir, file_name)?,
            (ReorganizeMode::Move, _) => {
                let dest = place_move(source, dest_dir, file_name)?;
                fs::remove_file(source).map_err(io_err(source))?;
                dest
            }
        };
        Ok(Placement::Placed(dest))
    }
}

/// `name.ext` for `n == 0`, otherwise `name (n).ext`.
pub fn candidate_name(file_name: &std::ffi::OsStr, n: u32) -> PathBuf {
    if n == 0 {
        return PathBuf::from(file_name);
    }
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match path.extension() {
        Some(ext) => PathBuf::from(format!("{stem} ({n}).{}", ext.to_string_lossy())),
        None => PathBuf::from(format!("{stem} ({n})")),
    }
}

fn already_in(source: &Path, dest_dir: &Path) -> bool {
    let (Some(parent), Ok(dest_dir)) = (source.parent(), dest_dir.canonicalize()) else {
        return false;
    };
    parent
        .canonicalize()
        .map(|parent| parent == dest_dir)
        .unwrap_or(false)
}

/// Link the source under the first free candidate name; fall back to a copy
/// when linking is not possible (e.g. across filesystems). The source stays.
fn place_move(
    source: &Path,
    dest_dir: &Path,
    file_name: &std::ffi::OsStr,
) -> Result<PathBuf, ReorganizeError> {
    for n in 0..MAX_SUFFIX {
        let candidate = dest_dir.join(candidate_name(file_name, n));
        match fs::hard_link(source, &candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                tracing::debug!("Hard link into {:?} failed ({e}), copying", dest_dir);
                return place_copy(source, dest_dir, file_name);
            }
        }
    }
    Err(exhausted(dest_dir))
}

/// Copy through a synced temporary file persisted under the first free
/// candidate name.
fn place_copy(
    source: &Path,
    dest_dir: &Path,
    file_name: &std::ffi::OsStr,
) -> Result<PathBuf, ReorganizeError> {
    let src_err = |source_err| ReorganizeError::Io {
        path: source.to_path_buf(),
        source: source_err,
    };
    let dest_err = |source_err| ReorganizeError::Io {
        path: dest_dir.to_path_buf(),
        source: source_err,
    };

    let mut input = fs::File::open(source).map_err(src_err)?;
    let mut tmp = NamedTempFile::new_in(dest_dir).map_err(dest_err)?;
    io::copy(&mut input, tmp.as_file_mut()).map_err(dest_err)?;
    persist_unclobbered(tmp, dest_dir, file_name)
}

/// Write `bytes` the same way [`place_copy`] writes a source's contents.
fn place_bytes(
    bytes: &[u8],
    dest_dir: &Path,
    file_name: &std::ffi::OsStr,
) -> Result<PathBuf, ReorganizeError> {
    let dest_err = |source| ReorganizeError::Io {
        path: dest_dir.to_path_buf(),
        source,
    };
    let mut tmp = NamedTempFile::new_in(dest_dir).map_err(dest_err)?;
    tmp.as_file_mut().write_all(bytes).map_err(dest_err)?;
    persist_unclobbered(tmp, dest_dir, file_name)
}

/// Sync `tmp` and persist it under the first free candidate name.
fn persist_unclobbered(
    mut tmp: NamedTempFile,
    dest_dir: &Path,
    file_name: &std::ffi::OsStr,
) -> Result<PathBuf, ReorganizeError> {
    let dest_err = |source| ReorganizeError::Io {
        path: dest_dir.to_path_buf(),
        source,
    };
    tmp.as_file().sync_all().map_err(dest_err)?;

    for n in 0..MAX_SUFFIX {
        let candidate = dest_dir.join(candidate_name(file_name, n));
        match tmp.persist_noclobber(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => tmp = e.file,
            Err(e) => return Err(dest_err(e.error)),
        }
    }
    Err(exhausted(dest_dir))
}

fn exhausted(dest_dir: &Path) -> ReorganizeError {
    ReorganizeError::Io {
        path: dest_dir.to_path_buf(),
        source: io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free file name after {MAX_SUFFIX} attempts"),
        ),
    }
}

/// Delete one image. `Ok(false)` when the file does not exist.
pub fn delete_image(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::info!("Deleted {:?}", path);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
