//! Postgres implementation of the driver traits, built on sqlx.
use super::{Command, Connection, Error, Row};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::value::RawValue;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::types::Json;
use sqlx::{Column as _, Connection as _, Row as _, TypeInfo as _};

/// PgCommand is a Postgres statement.
#[derive(Debug, Clone)]
pub struct PgCommand {
    text: String,
    persistent: bool,
}

impl Default for PgCommand {
    fn default() -> Self {
        Self {
            text: String::new(),
            persistent: true,
        }
    }
}

impl PgCommand {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            text: sql.into(),
            ..Default::default()
        }
    }

    /// Set whether the prepared statement is cached by the connection
    /// for re-use across executions. Defaults to true.
    pub fn set_persistent(&mut self, persistent: bool) {
        self.persistent = persistent;
    }
}

impl Command for PgCommand {
    fn set_text(&mut self, sql: &str) {
        self.text = sql.to_string();
    }
    fn text(&self) -> &str {
        &self.text
    }
}

/// PgSession is a Postgres connection which may be closed.
pub struct PgSession {
    conn: Option<PgConnection>,
}

impl PgSession {
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let conn = PgConnection::connect(url)
            .await
            .map_err(|err| Error::Connect(Box::new(err)))?;

        Ok(Self::new(conn))
    }

    pub fn new(conn: PgConnection) -> Self {
        Self { conn: Some(conn) }
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }
}

impl Connection for PgSession {
    type Command = PgCommand;
    type Row = PgRow;

    fn query<'c>(&'c mut self, command: &'c PgCommand) -> BoxStream<'c, Result<PgRow, Error>> {
        let Some(conn) = self.conn.as_mut() else {
            return stream::once(async { Err(Error::Closed) }).boxed();
        };

        sqlx::query(&command.text)
            .persistent(command.persistent)
            .fetch(conn)
            .map_err(|err| Error::Execute(Box::new(err)))
            .boxed()
    }

    async fn close(&mut self) -> Result<(), Error> {
        let Some(conn) = self.conn.take() else {
            return Ok(()); // Already closed.
        };

        conn.close()
            .await
            .map_err(|err| Error::Close(Box::new(err)))
    }
}

impl Row for PgRow {
    // JSON and JSONB columns are read as their raw document text, preserving
    // the spacing and property ordering produced by the server.
    fn get_text(&self, index: usize) -> Result<String, Error> {
        let column = self
            .try_column(index)
            .map_err(|err| Error::Read(Box::new(err)))?;

        match column.type_info().name() {
            "JSON" | "JSONB" => {
                let Json(doc): Json<Box<RawValue>> = self
                    .try_get(index)
                    .map_err(|err| Error::Read(Box::new(err)))?;
                Ok(doc.get().to_string())
            }
            _ => self
                .try_get::<String, _>(index)
                .map_err(|err| Error::Read(Box::new(err))),
        }
    }
}
