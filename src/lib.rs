pub mod block_util;
pub mod log_util;
pub mod record_util;
pub mod splitter_util;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Byte that terminates a record. The terminator belongs to the record.
pub const RECORD_DELIM: u8 = b'\n';
/// Byte that separates fields within a record.
pub const FIELD_DELIM: u8 = b',';

/// Copy buffer size for block transfers.
pub const BUFSIZE: usize = 8 * 1024;

/// Setup failures that stop the run before any worker starts.
///
/// Worker-local I/O errors are not represented here; they are logged and
/// contained inside the worker that hit them.
#[derive(Debug, Error)]
pub enum SplitError {
    #[error("cannot open or stat the input file {path}: {source}")]
    InputUnreadable { path: PathBuf, source: io::Error },

    #[error("the input file {path} is empty")]
    EmptyInput { path: PathBuf },

    #[error("unable to create the directory {path}: {source}")]
    DirCreate { path: PathBuf, source: io::Error },

    #[error("logger setup failed: {0}")]
    Logger(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
