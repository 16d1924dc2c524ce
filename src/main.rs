use clap::{Parser, Subcommand};
use std::fs;
use tracing::{error, info, warn};

use geoarchive::config::{Config, PdfEngineKind};
use geoarchive::geokb::GeoKbVocabulary;
use geoarchive::logging;
use geoarchive::pdf;
use geoarchive::pipeline::{BatchReport, DocumentPipeline, ItemStatus, VocabularyBundle};
use geoarchive::reconcile::Reconciler;
use geoarchive::sciencebase::ScienceBaseClient;
use geoarchive::zotero::ZoteroClient;

#[derive(Parser)]
#[command(name = "geoarchive")]
#[command(about = "GeoArchive technical-report archival pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process dropbox files into archived, linked records
    Process {
        /// Process at most this many files
        #[arg(long)]
        limit: Option<usize>,
        /// Override the configured PDF engine (pdftotext or lopdf)
        #[arg(long)]
        engine: Option<String>,
    },
    /// Run one inventory reconciliation cycle
    Reconcile,
    /// Run both process and reconcile sequentially
    Run {
        /// Process at most this many files
        #[arg(long)]
        limit: Option<usize>,
    },
}

async fn run_process(
    config: &Config,
    limit: Option<usize>,
    engine_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let repository = ScienceBaseClient::new(&config.repository);
    let bibliographic = ZoteroClient::new(&config.bibliographic);

    let engine_kind: PdfEngineKind = match engine_override {
        Some(name) => name.parse()?,
        None => config.pdf_engine,
    };
    let engine = pdf::engine_for(engine_kind);

    // A dead vocabulary source costs us linkage, not the batch.
    let vocab_source = GeoKbVocabulary::new(&config.vocabulary);
    let vocabularies = match VocabularyBundle::load(&vocab_source).await {
        Ok(bundle) => Some(bundle),
        Err(e) => {
            warn!("Failed to load vocabularies; records will carry no linkage: {}", e);
            println!("⚠️  Vocabulary source unreachable; continuing without term linkage");
            None
        }
    };

    fs::create_dir_all(&config.cache_dir)?;

    let pipeline = DocumentPipeline::new(
        &repository,
        &bibliographic,
        engine.as_ref(),
        vocabularies.as_ref(),
        &config.cache_dir,
        &config.repository.archive_item_id,
        &config.bibliographic.library_id,
    );

    info!("Starting document batch");
    println!("🚀 Processing dropbox files...");
    let report = pipeline
        .run_batch(&config.repository.dropbox_item_id, limit)
        .await?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &BatchReport) {
    println!("\n📊 Batch results (run {}):", report.run_id);
    for outcome in &report.outcomes {
        match &outcome.status {
            ItemStatus::Published { item_id } => {
                println!("   ✅ {} -> {}", outcome.source_name, item_id);
            }
            ItemStatus::Degraded { item_id, warnings } => {
                println!("   ⚠️  {} -> {}", outcome.source_name, item_id);
                for warning in warnings {
                    println!("      - {warning}");
                }
            }
            ItemStatus::Failed { reason } => {
                println!("   ❌ {}: {}", outcome.source_name, reason);
            }
        }
    }
    println!(
        "   Published: {}   Degraded: {}   Failed: {}",
        report.published(),
        report.degraded(),
        report.failed()
    );
}

async fn run_reconcile(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = ZoteroClient::new(&config.bibliographic);
    let reconciler = Reconciler::new(
        &store,
        config.bibliographic.snapshot_marker_key.clone(),
        config.cache_dir.clone(),
        config.bibliographic.library_id.clone(),
    );

    info!("Starting reconciliation cycle");
    println!("🔄 Reconciling inventory snapshot...");
    let outcome = reconciler.run().await?;

    if outcome.changes.any() {
        println!(
            "   ✅ Snapshot updated to version {} ({} items, {} collections, {} tags)",
            outcome.remote_version,
            outcome.item_count,
            outcome.collection_count,
            outcome.tag_count
        );
        if outcome.changes.items {
            println!("      - items rewritten");
        }
        if outcome.changes.collections {
            println!("      - collections rewritten");
        }
        if outcome.changes.tags {
            println!("      - tags rewritten");
        }
    } else {
        println!(
            "   ✅ Inventory already current (baseline version {})",
            outcome.baseline_version
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();

    // Configuration problems are fatal before any work starts.
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Process { limit, engine } => {
            run_process(&config, limit, engine).await?;
        }
        Commands::Reconcile => {
            run_reconcile(&config).await?;
        }
        Commands::Run { limit } => {
            run_process(&config, limit, None).await?;
            run_reconcile(&config).await?;
        }
    }

    Ok(())
}
