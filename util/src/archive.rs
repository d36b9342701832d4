//! Struct archiving functionality
//!
//! An `Archiver` writes serialisable records into a CSV file under the
//! session's archive root. The file is created and opened once, with the
//! header row written on the first record, and the handle is reused for the
//! remainder of the run.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
pub use csv::Writer;
use csv::WriterBuilder;
use std::fs::{File, OpenOptions};
use std::path::Path;
use thiserror::Error;

// Internal imports
use crate::session::Session;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Maximum number of numbered archive files with the same prefix.
const MAX_NUMBERED_FILES: usize = 100;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An object used to write CSV archive files.
#[derive(Default)]
pub struct Archiver {
    writer: Option<Writer<File>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with creating or writing an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Cannot create the archive file: {0}")]
    CannotCreateFile(std::io::Error),

    #[error("All {0} numbered archive files are already in use")]
    NoFreeIndex(usize),

    #[error("Cannot serialise the record into the archive: {0}")]
    SerialiseError(csv::Error),

    #[error("Cannot flush the archive to disk: {0}")]
    FlushError(std::io::Error),

    #[error("The archiver has no initialised writer")]
    NotInitialised,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Archiver {
    /// Create a new archiver from a paricular path relative to the session's
    /// archive root.
    pub fn from_path<P: AsRef<Path>>(session: &Session, path: P) -> Result<Self, ArchiveError> {
        let mut session_path = session.arch_root.clone();
        session_path.push(path);

        Self::open(&session_path)
    }

    /// Create a new archiver as `{prefix}{NN}.csv` in the session's archive
    /// root, where `NN` is the first unused index.
    pub fn from_numbered(session: &Session, prefix: &str) -> Result<Self, ArchiveError> {
        for i in 0..MAX_NUMBERED_FILES {
            let mut session_path = session.arch_root.clone();
            session_path.push(format!("{}{:02}.csv", prefix, i));

            if !session_path.exists() {
                return Self::open(&session_path);
            }
        }

        Err(ArchiveError::NoFreeIndex(MAX_NUMBERED_FILES))
    }

    /// Serialise a record into the archive.
    ///
    /// The CSV header row is derived from the record's field names and
    /// written before the first record.
    pub fn serialise<T: serde::Serialize>(&mut self, record: T) -> Result<(), ArchiveError> {
        match self.writer {
            Some(ref mut w) => {
                w.serialize(record)
                    .map_err(ArchiveError::SerialiseError)?;
                w.flush().map_err(ArchiveError::FlushError)?;

                Ok(())
            }
            None => Err(ArchiveError::NotInitialised),
        }
    }

    /// Create the archive file and wrap it in a CSV writer.
    fn open(path: &Path) -> Result<Self, ArchiveError> {
        // Create the file if it does not exist
        File::create(path).map_err(ArchiveError::CannotCreateFile)?;

        // Open the file in append mode
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(ArchiveError::CannotCreateFile)?;

        let w = WriterBuilder::new().has_headers(true).from_writer(file);

        Ok(Self { writer: Some(w) })
    }
}
