use super::{BoundCommand, Connection, Error};
use futures::stream::{BoxStream, TryStreamExt};
use std::future::Future;

/// Rows is a forward-only, one-pass cursor over the rows of an executed statement.
/// It cannot be restarted: rows which have been read are gone.
pub struct Rows<'a, R> {
    inner: BoxStream<'a, Result<R, Error>>,
    fetched: usize,
}

impl<'a, R> Rows<'a, R> {
    pub fn new(inner: BoxStream<'a, Result<R, Error>>) -> Self {
        Self { inner, fetched: 0 }
    }

    /// Advance to the next row, returning None once the cursor is exhausted.
    pub async fn next_row(&mut self) -> Result<Option<R>, Error> {
        let row = self.inner.try_next().await?;
        if row.is_some() {
            self.fetched += 1;
        }
        Ok(row)
    }

    /// Number of rows read from this cursor so far.
    pub fn fetched(&self) -> usize {
        self.fetched
    }
}

/// RowMapper executes a BoundCommand and dispatches its cursor to a handler.
///
/// The mapper owns statement execution and cursor teardown. It returns the
/// handler's result unmodified: it neither swallows nor retries errors, so that
/// callers may wrap it with their own error handling.
pub trait RowMapper<C: Connection>: Send + Sync {
    fn execute_reader<'a, F, Fut>(
        &'a self,
        command: BoundCommand<'a, C>,
        on_rows: F,
    ) -> impl Future<Output = Result<(), Error>> + Send + 'a
    where
        F: FnOnce(Rows<'a, C::Row>) -> Fut + Send + 'a,
        Fut: Future<Output = Result<(), Error>> + Send + 'a;
}

/// CursorMapper is the default RowMapper, which hands the handler a cursor
/// over the command's rows and drops that cursor once the handler completes.
#[derive(Debug, Default, Clone, Copy)]
pub struct CursorMapper;

impl<C: Connection> RowMapper<C> for CursorMapper {
    fn execute_reader<'a, F, Fut>(
        &'a self,
        command: BoundCommand<'a, C>,
        on_rows: F,
    ) -> impl Future<Output = Result<(), Error>> + Send + 'a
    where
        F: FnOnce(Rows<'a, C::Row>) -> Fut + Send + 'a,
        Fut: Future<Output = Result<(), Error>> + Send + 'a,
    {
        async move {
            let rows = command.execute();
            let result = on_rows(rows).await;

            tracing::trace!(ok = result.is_ok(), "released statement cursor");
            result
        }
    }
}
