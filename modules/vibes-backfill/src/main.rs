use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use ai_client::Claude;
use apify_client::ApifyClient;

use vibes_backfill::config::{load_file_config, AppConfig, BackfillConfig, Cli, FileConfig};
use vibes_backfill::cursor::{data_source_label, FileCursorStore};
use vibes_backfill::generator::ClaudeVibesGenerator;
use vibes_backfill::image_refresh::ApifyImageSource;
use vibes_backfill::logging::init_logging;
use vibes_backfill::store::{connect, PgEntityStore};
use vibes_backfill::{
    BatchController, ReportWriter, ResumableRunner, ShouldStop, VibesEnricher,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_file)?;

    let file = match &cli.config {
        Some(path) => load_file_config(path)?,
        None => FileConfig::default(),
    };

    let mut config = BackfillConfig::build(&cli, file, String::new())?;
    let app = AppConfig::from_env(config.needs_image_source())?;
    config.runner.data_source = data_source_label(&app.database_url);

    let pool = connect(&app.database_url)
        .await
        .context("connecting to the database")?;
    let store = Arc::new(PgEntityStore::new(pool));

    let claude = Claude::new(app.anthropic_api_key.clone(), config.file.generation.model.clone())
        .with_max_tokens(config.file.generation.max_tokens)
        .with_temperature(config.file.generation.temperature);
    let generator = Arc::new(ClaudeVibesGenerator::new(claude));

    let mut enricher = VibesEnricher::new(store.clone(), generator)
        .with_stats_classifier(config.file.stats.classifier()?);
    if config.needs_image_source() {
        let token = app
            .apify_api_key
            .clone()
            .context("APIFY_API_KEY is required for image refresh")?;
        let apify = ApifyClient::new(token).with_listing_actor(config.file.images.actor_id.clone());
        enricher = enricher.with_image_refresh(
            Arc::new(ApifyImageSource::new(apify)),
            config.runner.image_refresh.clone(),
        );
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop_flag = stop_flag.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing the current entity before stopping");
                stop_flag.store(true, Ordering::SeqCst);
            }
        });
    }
    let should_stop: ShouldStop = {
        let stop_flag = stop_flag.clone();
        Arc::new(move || stop_flag.load(Ordering::SeqCst))
    };

    let controller = BatchController::new(store, enricher);
    let mut runner = ResumableRunner::new(config.runner.clone(), controller)
        .with_report_writer(ReportWriter::new(&config.report_dir))
        .with_should_stop(should_stop);
    if config.runner.cursor_enabled {
        runner = runner.with_cursor_store(Arc::new(FileCursorStore::new(&config.cursor_path)));
    }

    let report = runner.run().await?;
    println!("{report}");
    info!(stop_reason = ?report.stop_reason, "Done");

    Ok(())
}
