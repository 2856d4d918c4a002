use crate::{Command, Connection, Error, Row};
use futures::stream::{self, BoxStream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

#[derive(Debug, Default)]
pub struct FakeCommand {
    text: String,
}

impl Command for FakeCommand {
    fn set_text(&mut self, sql: &str) {
        self.text = sql.to_string();
    }
    fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone)]
pub enum FakeRow {
    Text(String),
    Null,
}

impl FakeRow {
    pub fn text(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl Row for FakeRow {
    fn get_text(&self, index: usize) -> Result<String, Error> {
        match self {
            Self::Text(text) if index == 0 => Ok(text.clone()),
            Self::Text(_) => Err(Error::Read(format!("no column at index {index}").into())),
            Self::Null => Err(Error::Read("unexpected NULL".into())),
        }
    }
}

/// Script is the canned behavior of a FakeConnection's statements.
#[derive(Debug, Clone)]
pub enum Script {
    Rows(Vec<FakeRow>),
    Fail(&'static str),
    Hang,
}

/// FakeConnection runs every statement against its Script,
/// and records the statements it ran and how often it was closed.
pub struct FakeConnection {
    script: Script,
    pub executed: Vec<String>,
    pub closes: usize,
    pub fail_close: bool,
    closed: bool,
    rows_read: Arc<AtomicUsize>,
}

impl FakeConnection {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            executed: Vec::new(),
            closes: 0,
            fail_close: false,
            closed: false,
            rows_read: Default::default(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Total number of rows pulled from statement cursors.
    pub fn rows_read(&self) -> usize {
        self.rows_read.load(Ordering::SeqCst)
    }
}

impl Connection for FakeConnection {
    type Command = FakeCommand;
    type Row = FakeRow;

    fn query<'c>(&'c mut self, command: &'c FakeCommand) -> BoxStream<'c, Result<FakeRow, Error>> {
        if self.closed {
            return stream::once(async { Err(Error::Closed) }).boxed();
        }
        self.executed.push(command.text().to_string());

        match &self.script {
            Script::Rows(rows) => {
                let rows_read = self.rows_read.clone();

                stream::iter(rows.clone())
                    .map(Ok::<_, Error>)
                    .inspect(move |_| {
                        rows_read.fetch_add(1, Ordering::SeqCst);
                    })
                    .boxed()
            }
            Script::Fail(message) => {
                let message = *message;
                stream::once(async move { Err(Error::Execute(message.into())) }).boxed()
            }
            Script::Hang => stream::pending().boxed(),
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.closes += 1;
        self.closed = true;

        if self.fail_close {
            Err(Error::Close("connection reset during close".into()))
        } else {
            Ok(())
        }
    }
}

/// RecordingSink is an AsyncWrite which records what it was sent.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub written: Vec<u8>,
    pub flushes: usize,
    pub shutdowns: usize,
    pub fail_write: bool,
    pub fail_flush: bool,
}

impl tokio::io::AsyncWrite for RecordingSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        if this.fail_write {
            return Poll::Ready(Err(broken_pipe()));
        }
        this.written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        this.flushes += 1;

        if this.fail_flush {
            Poll::Ready(Err(broken_pipe()))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.get_mut().shutdowns += 1;
        Poll::Ready(Ok(()))
    }
}

fn broken_pipe() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "client went away")
}
