//! sql-pipe executes a single SQL statement and streams the first column of
//! its first row, as raw UTF-8 bytes, into an `AsyncWrite` sink. If the
//! statement returns no rows, a caller-provided default payload is written
//! instead.
//!
//! This is intended for request handlers which forward a document that the
//! database has already serialized (for example, the output of `row_to_json`
//! or `json_agg`) without parsing or re-encoding it.
mod driver;
mod mapper;
mod pipe;
pub mod postgres;

#[cfg(test)]
mod test_util;

pub use driver::{BoundCommand, Command, Connection, Row};
pub use mapper::{CursorMapper, RowMapper, Rows};
pub use pipe::{ConnectionDisposition, ErrorHandler, ErrorPolicy, QueryPipe};

/// BoxError is a type-erased error of an underlying database driver.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error that describes a failed streaming operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the database connection is closed")]
    Closed,
    #[error("failed to connect to the database")]
    Connect(#[source] BoxError),
    #[error("failed to execute statement")]
    Execute(#[source] BoxError),
    #[error("failed to read the first column of the result row as text")]
    Read(#[source] BoxError),
    #[error("failed to write to the output sink")]
    Write(#[source] std::io::Error),
    #[error("failed to close the database connection")]
    Close(#[source] BoxError),
    #[error("statement was cancelled")]
    Cancelled,
}
