//! Coverage consolidation.
//!
//! Every device pulls its own exec-data file after a run. This module merges
//! those files into one artifact so downstream coverage reports see the union
//! of all hits. Two layouts are supported:
//!
//! ```text
//! by serial   <output>/coverage/<sanitized serial>/coverage.ec   (inputs)
//!             <output>/coverage/merged-coverage.ec               (output)
//!
//! by folder   <folder>/*                                         (inputs)
//!             <folder>/coverage.ec                               (output)
//! ```
//!
//! Both entry points load every input before writing anything, so a failing
//! input never leaves a partial merge behind. Existing outputs are
//! overwritten.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use shardline::coverage::merge_by_serial;
//!
//! let merged = merge_by_serial(["emulator-5554", "10.0.0.2:5555"], Path::new("shardline-output"))?;
//! println!("Merged coverage written to {}", merged.display());
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod exec;
pub mod store;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::identity::sanitize_serial;

pub use exec::{ExecBlock, ExecDataReader, ExecDataWriter, ExecFormatError, ExecutionData, SessionInfo};
pub use store::{ExecutionDataStore, PutOutcome};

/// Directory below the output root holding per-device coverage.
pub const COVERAGE_DIR: &str = "coverage";

/// File name of a device's coverage file, and of a merged folder.
pub const COVERAGE_FILE: &str = "coverage.ec";

/// File name of the cross-device merge below [`COVERAGE_DIR`].
pub const MERGED_COVERAGE_FILE: &str = "merged-coverage.ec";

/// Errors raised while merging coverage files.
#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    /// An expected input is missing or cannot be read.
    #[error("Failed to read coverage file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An input is not valid exec-data.
    #[error("Invalid coverage file {}: {source}", path.display())]
    Format {
        path: PathBuf,
        #[source]
        source: ExecFormatError,
    },

    /// A folder merge found nothing to merge.
    #[error("No coverage file in path {}", .0.display())]
    NoCoverageFiles(PathBuf),

    /// The merged output could not be written.
    #[error("Failed to write merged coverage {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CoverageError {
    fn format(path: &Path, source: ExecFormatError) -> Self {
        match source {
            ExecFormatError::Io(source) => CoverageError::Read {
                path: path.to_path_buf(),
                source,
            },
            source => CoverageError::Format {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

/// Loads exec-data files into one [`ExecutionDataStore`] and saves the union.
#[derive(Debug, Default)]
pub struct ExecFileLoader {
    store: ExecutionDataStore,
}

impl ExecFileLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges the contents of one exec-data file into the store.
    pub fn load(&mut self, path: &Path) -> Result<(), CoverageError> {
        let file = File::open(path).map_err(|source| CoverageError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut reader = ExecDataReader::new(BufReader::new(file));
        let mut classes = 0usize;
        while let Some(block) = reader
            .next_block()
            .map_err(|e| CoverageError::format(path, e))?
        {
            match block {
                ExecBlock::Session(info) => self.store.add_session(info),
                ExecBlock::Execution(data) => {
                    classes += 1;
                    self.store.put(data);
                }
            }
        }

        debug!("Loaded {} class records from {}", classes, path.display());
        Ok(())
    }

    pub fn store(&self) -> &ExecutionDataStore {
        &self.store
    }

    /// Writes the merged store to `path`, replacing any existing file.
    ///
    /// Parent directories are created. The data is written to a temporary
    /// file next to `path` and renamed into place.
    pub fn save(&self, path: &Path) -> Result<(), CoverageError> {
        let write_err = |source: std::io::Error| CoverageError::Write {
            path: path.to_path_buf(),
            source,
        };

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(write_err)?;

        let mut temp = NamedTempFile::new_in(parent).map_err(write_err)?;
        {
            let mut writer = ExecDataWriter::new(BufWriter::new(temp.as_file_mut()))
                .map_err(|e| write_err(into_io(e)))?;
            self.store
                .write_to(&mut writer)
                .map_err(|e| write_err(into_io(e)))?;
            writer.finish().map_err(|e| write_err(into_io(e)))?;
        }
        temp.persist(path).map_err(|e| write_err(e.error))?;

        debug!(
            "Saved {} classes and {} sessions to {}",
            self.store.len(),
            self.store.sessions().len(),
            path.display()
        );
        Ok(())
    }
}

fn into_io(err: ExecFormatError) -> std::io::Error {
    match err {
        ExecFormatError::Io(err) => err,
        other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
    }
}

/// Path of a device's coverage file below `output_root`.
pub fn device_coverage_dir(output_root: &Path, serial: &str) -> PathBuf {
    output_root.join(COVERAGE_DIR).join(sanitize_serial(serial))
}

/// Merges the coverage files of the given devices.
///
/// Loads `<output_root>/coverage/<sanitized serial>/coverage.ec` for every
/// serial and writes the union to
/// `<output_root>/coverage/merged-coverage.ec`, returning that path.
///
/// # Errors
///
/// Fails without writing anything if any device file is missing, unreadable
/// or malformed, or if the merged file cannot be written.
pub fn merge_by_serial<I, S>(serials: I, output_root: &Path) -> Result<PathBuf, CoverageError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut loader = ExecFileLoader::new();
    let mut devices = 0usize;
    for serial in serials {
        let path = device_coverage_dir(output_root, serial.as_ref()).join(COVERAGE_FILE);
        loader.load(&path)?;
        devices += 1;
    }

    let merged = output_root.join(COVERAGE_DIR).join(MERGED_COVERAGE_FILE);
    loader.save(&merged)?;
    info!(
        "Merged coverage of {} devices into {}",
        devices,
        merged.display()
    );
    Ok(merged)
}

/// Merges every file directly inside `folder` into `<folder>/coverage.ec`.
///
/// Files are loaded in file-name order regardless of their names, so a
/// `coverage.ec` left by an earlier merge is folded in again. Returns the
/// output path.
///
/// # Errors
///
/// Returns [`CoverageError::NoCoverageFiles`] if the folder is missing,
/// unreadable or holds no files; nothing is written in that case.
pub fn merge_all_in_folder(folder: &Path) -> Result<PathBuf, CoverageError> {
    let no_files = || CoverageError::NoCoverageFiles(folder.to_path_buf());

    let mut inputs: Vec<PathBuf> = fs::read_dir(folder)
        .map_err(|_| no_files())?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    if inputs.is_empty() {
        return Err(no_files());
    }
    inputs.sort();

    let mut loader = ExecFileLoader::new();
    for input in &inputs {
        loader.load(input)?;
    }

    let merged = folder.join(COVERAGE_FILE);
    loader.save(&merged)?;
    info!(
        "Merged {} coverage files into {}",
        inputs.len(),
        merged.display()
    );
    Ok(merged)
}

/// Reads a single exec-data file, for inspection.
pub fn read_exec_file(path: &Path) -> Result<ExecutionDataStore, CoverageError> {
    let mut loader = ExecFileLoader::new();
    loader.load(path)?;
    Ok(loader.store)
}
