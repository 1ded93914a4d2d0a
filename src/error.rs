//! Library-wide error taxonomy.
//!
//! Every failure category carries a stable numeric code (see `ErrorCode`);
//! the codes are part of the public contract and are asserted by the
//! integration suite and relied upon by wire-protocol layers built on top.

use std::error;
use std::fmt;
use std::result;
use std::sync::PoisonError;

use crate::coll::error::{BulkWriteException, WriteException};

/// A type for results generated by this crate, where the `Err` type is `Error`.
pub type Result<T> = result::Result<T, Error>;

/// Stable numeric codes for the failure categories of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Unknown query operator, malformed operand, or invalid `$regex` pattern.
    BadValue = 2,
    /// Unknown update operator, conflicting update paths, or update-operator
    /// keys inside a replacement document.
    FailedToParse = 9,
    /// An operand applied to a value of the wrong type, such as `$inc` on a
    /// string or `$push` on a non-array.
    TypeMismatch = 14,
    /// An ObjectId literal with non-hex characters or the wrong length.
    InvalidObjectId = 15,
    /// An `_id` already present in the collection.
    DuplicateKey = 11000,
    /// The operation was aborted by its cancellation token.
    Interrupted = 11601,
    /// Unknown aggregation stage, invalid `$limit`, or invalid `$skip`.
    InvalidPipeline = 40324,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{:?} ({})", self, self.code())
    }
}

/// The error type for all engine operations.
#[derive(Debug)]
pub enum Error {
    /// An invalid argument at the public API boundary.
    ArgumentError(String),
    /// A malformed filter document. Code 2.
    BadQuery(String),
    /// A malformed update document. Code 9.
    BadUpdate(String),
    /// An operand applied to a value of the wrong type. Code 14.
    TypeMismatch(String),
    /// A malformed aggregation pipeline. Code 40324.
    InvalidPipeline(String),
    /// A malformed ObjectId literal. Code 15.
    InvalidObjectId(String),
    /// The operation was aborted at a suspension point. Code 11601.
    Interrupted,
    /// A write failed against a single document.
    WriteError(WriteException),
    /// One or more writes of a batch operation failed.
    BulkWriteError(BulkWriteException),
    /// The storage collaborator reported a failure.
    SqlError(rusqlite::Error),
    /// A stored payload could not be decoded.
    DecoderError(serde_json::Error),
    /// ObjectId generation failed.
    OIDError(bson::oid::Error),
    /// A shared-state lock was poisoned by a panicking writer.
    PoisonLockError,
    /// A generic operational failure.
    OperationError(String),
}

impl Error {
    /// The stable numeric code for this error, if its category carries one.
    pub fn code(&self) -> Option<i32> {
        match *self {
            Error::BadQuery(_) => Some(ErrorCode::BadValue.code()),
            Error::BadUpdate(_) => Some(ErrorCode::FailedToParse.code()),
            Error::TypeMismatch(_) => Some(ErrorCode::TypeMismatch.code()),
            Error::InvalidPipeline(_) => Some(ErrorCode::InvalidPipeline.code()),
            Error::InvalidObjectId(_) => Some(ErrorCode::InvalidObjectId.code()),
            Error::Interrupted => Some(ErrorCode::Interrupted.code()),
            Error::WriteError(ref exc) => Some(exc.code),
            Error::BulkWriteError(ref exc) => {
                exc.write_errors.first().map(|failure| failure.code)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::ArgumentError(ref inner) => inner.fmt(fmt),
            Error::BadQuery(ref inner) => write!(fmt, "bad query: {}", inner),
            Error::BadUpdate(ref inner) => write!(fmt, "bad update: {}", inner),
            Error::TypeMismatch(ref inner) => write!(fmt, "type mismatch: {}", inner),
            Error::InvalidPipeline(ref inner) => write!(fmt, "invalid pipeline: {}", inner),
            Error::InvalidObjectId(ref inner) => write!(fmt, "invalid ObjectId: {}", inner),
            Error::Interrupted => fmt.write_str("operation was interrupted"),
            Error::WriteError(ref inner) => inner.fmt(fmt),
            Error::BulkWriteError(ref inner) => inner.fmt(fmt),
            Error::SqlError(ref inner) => inner.fmt(fmt),
            Error::DecoderError(ref inner) => inner.fmt(fmt),
            Error::OIDError(ref inner) => inner.fmt(fmt),
            Error::PoisonLockError => fmt.write_str("lock poisoned by a panicking writer"),
            Error::OperationError(ref inner) => inner.fmt(fmt),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::SqlError(ref inner) => Some(inner),
            Error::DecoderError(ref inner) => Some(inner),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Error {
        Error::SqlError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::DecoderError(err)
    }
}

impl From<bson::oid::Error> for Error {
    fn from(err: bson::oid::Error) -> Error {
        Error::OIDError(err)
    }
}

impl From<WriteException> for Error {
    fn from(err: WriteException) -> Error {
        Error::WriteError(err)
    }
}

impl From<BulkWriteException> for Error {
    fn from(err: BulkWriteException) -> Error {
        Error::BulkWriteError(err)
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Error {
        Error::PoisonLockError
    }
}
