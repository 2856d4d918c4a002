use super::{BoundCommand, Command, Connection, CursorMapper, Error, Row, RowMapper, Rows};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// ErrorHandler receives the error of a failed stream operation.
/// Returning Ok suppresses the error, while returning Err propagates it to the caller.
pub type ErrorHandler = Arc<dyn Fn(Error) -> Result<(), Error> + Send + Sync>;

/// ErrorPolicy determines what happens to the error of a failed stream operation.
#[derive(Clone, Default)]
pub enum ErrorPolicy {
    /// Return the error to the caller.
    #[default]
    Rethrow,
    /// Deliver the error to a handler, which decides whether it propagates.
    Handle(ErrorHandler),
}

impl ErrorPolicy {
    pub fn handle<F>(handler: F) -> Self
    where
        F: Fn(Error) -> Result<(), Error> + Send + Sync + 'static,
    {
        Self::Handle(Arc::new(handler))
    }

    fn dispatch(&self, error: Error) -> Result<(), Error> {
        match self {
            Self::Rethrow => Err(error),
            Self::Handle(handler) => handler(error),
        }
    }
}

impl std::fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rethrow => f.write_str("Rethrow"),
            Self::Handle(_) => f.write_str("Handle(..)"),
        }
    }
}

/// ConnectionDisposition determines whether a QueryPipe closes its
/// connection at the end of each stream operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ConnectionDisposition {
    /// Close the connection after every operation, whether it succeeded or failed.
    /// The connection must be re-opened before it's used again.
    #[default]
    CloseAfterCall,
    /// Leave the connection open. The owner closes it when it's done.
    LeaveOpen,
}

/// QueryPipe executes statements over a Connection and streams the first
/// column of the first result row of each into an output sink.
///
/// A pipe runs one statement at a time, and each operation takes `&mut self`.
/// Callers that need concurrency should use one pipe (and connection) per task.
pub struct QueryPipe<C: Connection, M = CursorMapper> {
    connection: C,
    mapper: M,
    error_policy: ErrorPolicy,
    disposition: ConnectionDisposition,
}

impl<C: Connection> QueryPipe<C> {
    /// Build a QueryPipe over `connection` which rethrows errors and
    /// closes the connection after each call.
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            mapper: CursorMapper,
            error_policy: ErrorPolicy::default(),
            disposition: ConnectionDisposition::default(),
        }
    }
}

impl<C: Connection, M: RowMapper<C>> QueryPipe<C, M> {
    pub fn with_error_policy(self, error_policy: ErrorPolicy) -> Self {
        Self {
            error_policy,
            ..self
        }
    }

    pub fn with_disposition(self, disposition: ConnectionDisposition) -> Self {
        Self {
            disposition,
            ..self
        }
    }

    pub fn with_mapper<N: RowMapper<C>>(self, mapper: N) -> QueryPipe<C, N> {
        let Self {
            connection,
            mapper: _,
            error_policy,
            disposition,
        } = self;

        QueryPipe {
            connection,
            mapper,
            error_policy,
            disposition,
        }
    }

    pub fn disposition(&self) -> ConnectionDisposition {
        self.disposition
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn into_connection(self) -> C {
        self.connection
    }

    /// Execute `sql` and stream the text of the first column of its first row
    /// into `sink`. If there are no rows, `default_output` is written instead
    /// (nothing is written if it's empty). The sink is flushed but never shut down.
    ///
    /// Errors of execution, reading, or writing are routed through the pipe's
    /// ErrorPolicy. Bytes which reached the sink before an error are not
    /// retracted, so on error the sink may hold a partial value.
    pub async fn stream<W>(
        &mut self,
        sql: &str,
        sink: &mut W,
        default_output: &str,
    ) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut command = C::Command::default();
        command.set_text(sql);

        self.run(command, sink, default_output, None).await
    }

    /// Stream a pre-built `command`, as with `stream()`.
    pub async fn stream_command<W>(
        &mut self,
        command: C::Command,
        sink: &mut W,
        default_output: &str,
    ) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        self.run(command, sink, default_output, None).await
    }

    /// Stream `sql` as with `stream()`, but stop with Error::Cancelled if
    /// `cancel` fires before the operation completes.
    pub async fn stream_cancellable<W>(
        &mut self,
        sql: &str,
        sink: &mut W,
        default_output: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut command = C::Command::default();
        command.set_text(sql);

        self.run(command, sink, default_output, Some(cancel)).await
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(sql = %command.text(), disposition = ?self.disposition),
    )]
    async fn run<W>(
        &mut self,
        command: C::Command,
        sink: &mut W,
        default_output: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let result = {
            let Self {
                connection, mapper, ..
            } = &mut *self;

            let execute = mapper.execute_reader(
                BoundCommand::bind(&command, connection),
                move |rows| write_first_row(rows, sink, default_output),
            );

            match cancel {
                Some(cancel) => tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(Error::Cancelled),
                    result = execute => result,
                },
                None => execute.await,
            }
        };
        std::mem::drop(command);

        let failed = result.is_err();
        let outcome = match result {
            Ok(()) => Ok(()),
            Err(error) => self.error_policy.dispatch(error),
        };

        match self.release_connection().await {
            Ok(()) => outcome,
            Err(close_error) if failed => {
                tracing::warn!(error = ?close_error, "failed to close connection of a failed statement");
                outcome
            }
            Err(close_error) => self.error_policy.dispatch(close_error),
        }
    }

    async fn release_connection(&mut self) -> Result<(), Error> {
        match self.disposition {
            ConnectionDisposition::CloseAfterCall => self.connection.close().await,
            ConnectionDisposition::LeaveOpen => Ok(()),
        }
    }
}

// Consume at most one row of `rows`: write its first column to `sink`,
// or write `default_output` if there is no row.
async fn write_first_row<R, W>(
    mut rows: Rows<'_, R>,
    sink: &mut W,
    default_output: &str,
) -> Result<(), Error>
where
    R: Row,
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let body = match rows.next_row().await? {
        Some(row) => row.get_text(0)?,
        None if default_output.is_empty() => {
            tracing::debug!("statement returned no rows and there's no default output");
            return Ok(());
        }
        None => default_output.to_string(),
    };

    sink.write_all(body.as_bytes())
        .await
        .map_err(Error::Write)?;
    sink.flush().await.map_err(Error::Write)?;

    tracing::debug!(
        bytes = body.len(),
        rows = rows.fetched(),
        "wrote statement output"
    );
    Ok(())
}
