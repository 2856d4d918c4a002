use super::Error;
use futures::stream::BoxStream;
use std::future::Future;

/// Command is a statement which may be executed by a Connection.
/// A fresh Command is built with `Default` and then given its text.
pub trait Command: Default + Send + Sync {
    fn set_text(&mut self, sql: &str);
    fn text(&self) -> &str;
}

/// Row is a single result row of an executed Command.
pub trait Row: Send {
    /// Read the column at `index` as text.
    fn get_text(&self, index: usize) -> Result<String, Error>;
}

/// Connection is a live database session which executes Commands.
pub trait Connection: Send {
    type Command: Command;
    type Row: Row;

    /// Execute `command`, returning a lazy and forward-only stream of its rows.
    /// Rows are fetched only as the stream is polled, and dropping the stream
    /// abandons any rows which remain.
    fn query<'c>(
        &'c mut self,
        command: &'c Self::Command,
    ) -> BoxStream<'c, Result<Self::Row, Error>>;

    /// Close the session. Subsequent queries fail with `Error::Closed`.
    fn close(&mut self) -> impl Future<Output = Result<(), Error>> + Send + '_;
}

/// BoundCommand is a Command paired with the Connection which will execute it.
/// The binding holds the Connection exclusively, so a Connection may run at
/// most one statement at a time.
pub struct BoundCommand<'a, C: Connection> {
    connection: &'a mut C,
    command: &'a C::Command,
}

impl<'a, C: Connection> BoundCommand<'a, C> {
    pub fn bind(command: &'a C::Command, connection: &'a mut C) -> Self {
        Self {
            connection,
            command,
        }
    }

    pub fn text(&self) -> &str {
        self.command.text()
    }

    /// Execute the bound command, returning a cursor over its rows.
    pub fn execute(self) -> super::Rows<'a, C::Row> {
        let Self {
            connection,
            command,
        } = self;

        super::Rows::new(connection.query(command))
    }
}
