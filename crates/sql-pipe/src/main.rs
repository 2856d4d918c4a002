use anyhow::Context;
use clap::Parser;
use sql_pipe::{postgres::PgSession, Connection, ConnectionDisposition, ErrorPolicy, QueryPipe};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// sql-pipe runs SQL statements against a Postgres database, and writes the
/// first column of the first row of each statement to stdout without
/// otherwise transforming it.
///
/// Statements are typically ones which build a document within the database,
/// such as `SELECT json_agg(t) FROM my_table t`.
#[derive(clap::Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// URL of the Postgres database.
    #[clap(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,
    /// Output to write for a statement which returns no rows.
    #[clap(long, env = "SQL_PIPE_DEFAULT_OUTPUT", default_value = "")]
    default_output: String,
    /// Separator written between the outputs of consecutive statements.
    #[clap(long, default_value = "\n")]
    separator: String,
    /// Log statements which fail and continue with the next, rather than exiting.
    #[clap(long)]
    continue_on_error: bool,
    /// Whether the connection is closed after each statement.
    /// With `close-after-call`, only the first statement may run.
    #[clap(long, value_enum, default_value = "leave-open")]
    disposition: ConnectionDisposition,
    /// Emit logs to stderr as JSON, rather than as text.
    #[clap(long)]
    log_json: bool,
    /// Statements to run, in order.
    #[clap(required = true)]
    statements: Vec<String>,
}

fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    // Logs go to stderr, as stdout carries statement outputs.
    let builder = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr);

    let installed = if args.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.expect("setting tracing default failed");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async_main(args));

    tracing::debug!(?result, "main function completed, shutting down runtime");
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result
}

async fn async_main(
    Args {
        database_url,
        default_output,
        separator,
        continue_on_error,
        disposition,
        log_json: _,
        statements,
    }: Args,
) -> anyhow::Result<()> {
    let session = PgSession::connect(&database_url)
        .await
        .context("failed to connect to the database")?;

    let error_policy = if continue_on_error {
        ErrorPolicy::handle(|error| {
            tracing::error!(error = ?anyhow::Error::from(error), "statement failed");
            Ok(())
        })
    } else {
        ErrorPolicy::Rethrow
    };

    let mut pipe = QueryPipe::new(session)
        .with_error_policy(error_policy)
        .with_disposition(disposition);

    // Cancel an in-flight statement upon Ctrl-C.
    let cancel = CancellationToken::new();
    let on_signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("caught signal, cancelling");
                cancel.cancel();
            }
        })
    };

    tracing::debug!(statements = statements.len(), ?disposition, "running statements");
    let mut stdout = tokio::io::stdout();

    for (index, sql) in statements.iter().enumerate() {
        if cancel.is_cancelled() {
            anyhow::bail!("cancelled before statement at index {index}");
        }
        if index != 0 && !separator.is_empty() {
            stdout.write_all(separator.as_bytes()).await?;
        }

        pipe.stream_cancellable(sql, &mut stdout, &default_output, &cancel)
            .await
            .with_context(|| format!("failed to stream statement at index {index}"))?;
    }
    on_signal.abort();

    stdout.flush().await?;

    pipe.into_connection()
        .close()
        .await
        .context("failed to close the database connection")?;

    Ok(())
}
