use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tickerclean_core::matching::MatchDecisionEngine;
use tickerclean_core::reconcile::{self, Reconciler, RunOptions};
use tickerclean_core::storage::theses::PgThesisStore;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "tickerclean_worker")]
struct Args {
    /// Records fetched per database query.
    #[arg(long, default_value_t = 100)]
    batch_size: usize,

    /// Stop after this many records; all eligible records if omitted.
    #[arg(long)]
    limit: Option<usize>,

    /// Stage proposed changes in a CSV file instead of writing to the database.
    #[arg(long, conflicts_with = "from_csv")]
    to_csv: bool,

    /// Apply a previously exported change-set file and exit.
    #[arg(long)]
    from_csv: Option<PathBuf>,

    /// Directory for exported change-set files.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = tickerclean_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let db_url = settings.require_database_url()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    tickerclean_core::storage::migrate(&pool).await?;

    let store = PgThesisStore::new(pool);

    if let Some(path) = args.from_csv {
        let summary = reconcile::apply_change_set(&store, &path).await?;
        tracing::info!(
            applied = summary.applied,
            unchanged = summary.unchanged,
            missing = summary.missing,
            failed = summary.failed,
            "change-set applied"
        );
        return Ok(());
    }

    // The search/match stack is only built for a reconciliation run; applying
    // a change-set needs neither the search API nor an LLM key.
    let search = tickerclean_core::search::yahoo::YahooSearchClient::from_env()?;
    let llm = tickerclean_core::llm::anthropic::AnthropicClient::from_settings(&settings)?;
    let engine = MatchDecisionEngine::new(&search, &llm);

    let summary = Reconciler::new(&store, engine)
        .with_out_dir(&args.out_dir)
        .run(&RunOptions {
            batch_size: args.batch_size,
            total_limit: args.limit,
            export: args.to_csv,
        })
        .await;

    match summary {
        Ok(summary) => {
            tracing::info!(
                processed = summary.processed,
                updated = summary.updated,
                failed = summary.failed,
                exported = ?summary.exported,
                "run finished"
            );
            Ok(())
        }
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "reconciliation run failed");
            Err(err)
        }
    }
}

fn init_sentry(settings: &tickerclean_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
