//! TraceGraph CLI
//!
//! Command-line interface for:
//! - Running the extraction pipeline against a source tree (`run`)
//! - Syncing the primary store into the graph store (`sync`, `--replace`)
//! - Auditing cross-store consistency (`verify`)
//! - Inspecting the shadow ledger and epoch history (`ledger`, `epochs`)
//! - Per-type record statistics (`stats`)

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracegraph_graph::GraphStore;
use tracegraph_model::{EpochStatus, TypeRegistry};
use tracegraph_pipeline::{
    FilesystemInventoryProvider, Pipeline, PipelineConfig, RelationshipPolicy, Stage,
};
use tracegraph_store::{
    EpochService, PrimaryStore, RunProvenance, ShadowLedger, StoreConfig, UpsertService,
};
use tracegraph_sync::{GraphSynchronizer, Reconciler};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "tracegraph")]
#[command(author, version, about = "TraceGraph: dual-store provenance sync engine")]
struct Cli {
    /// Store root directory (snapshot, ledger, epoch records).
    #[arg(long, default_value = ".tracegraph", global = true)]
    data_dir: PathBuf,

    /// Project scope for every operation.
    #[arg(long, default_value = "default", global = true)]
    project: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the extraction pipeline against a source tree.
    Run {
        /// Root of the source tree to inventory.
        #[arg(default_value = ".")]
        repo: PathBuf,

        /// Governing requirements document, hashed into run provenance.
        #[arg(long)]
        brd: Option<PathBuf>,

        /// Abort remaining stages on the first fatal stage failure.
        #[arg(long)]
        fail_fast: bool,

        /// Sample size for the post-run type-consistency check.
        #[arg(long, default_value_t = 100)]
        sample: usize,
    },

    /// Project the primary store into the graph store.
    Sync {
        /// Drop the project's edges first and rebuild them from the
        /// primary store, instead of the default idempotent merge.
        #[arg(long)]
        replace: bool,
    },

    /// Audit cross-store consistency without modifying either store.
    Verify {
        /// Keys sampled per kind for the type-consistency level.
        #[arg(long, default_value_t = 100)]
        sample: usize,

        /// Bound on enumerated findings per category.
        #[arg(long, default_value_t = tracegraph_sync::reconcile::DEFAULT_REPORT_CAP)]
        cap: usize,

        /// Stop after per-type count parity (cheapest level only).
        #[arg(long)]
        counts_only: bool,
    },

    /// Inspect the append-only shadow ledger.
    Ledger {
        #[command(subcommand)]
        command: LedgerCommands,
    },

    /// Inspect epoch history.
    Epochs {
        #[command(subcommand)]
        command: EpochCommands,
    },

    /// Per-type record counts in the primary store.
    Stats,
}

#[derive(Subcommand)]
enum LedgerCommands {
    /// Print the last N ledger entries for the project.
    Tail {
        #[arg(short = 'n', long, default_value_t = 20)]
        lines: usize,

        /// Skip malformed lines instead of failing on them.
        #[arg(long)]
        lenient: bool,
    },
}

#[derive(Subcommand)]
enum EpochCommands {
    /// List epoch records, most recent first.
    List {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Show one epoch record in full.
    Show {
        /// Epoch id (UUID).
        epoch_id: Uuid,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store_config = StoreConfig::new(&cli.data_dir);

    match cli.command {
        Commands::Run {
            repo,
            brd,
            fail_fast,
            sample,
        } => cmd_run(&store_config, &cli.project, &repo, brd.as_deref(), fail_fast, sample),
        Commands::Sync { replace } => cmd_sync(&store_config, &cli.project, replace),
        Commands::Verify {
            sample,
            cap,
            counts_only,
        } => cmd_verify(&store_config, &cli.project, sample, cap, counts_only),
        Commands::Ledger {
            command: LedgerCommands::Tail { lines, lenient },
        } => cmd_ledger_tail(&store_config, &cli.project, lines, lenient),
        Commands::Epochs { command } => match command {
            EpochCommands::List { limit } => cmd_epochs_list(&store_config, &cli.project, limit),
            EpochCommands::Show { epoch_id } => cmd_epochs_show(&store_config, &cli.project, epoch_id),
        },
        Commands::Stats => cmd_stats(&store_config, &cli.project),
    }
}

// ============================================================================
// Service wiring
// ============================================================================

struct Services {
    primary: Arc<PrimaryStore>,
    graph: Arc<GraphStore>,
    ledger: Arc<ShadowLedger>,
    epochs: Arc<EpochService>,
    upserts: Arc<UpsertService>,
}

fn open_services(config: &StoreConfig, project: &str, provenance: RunProvenance) -> Result<Services> {
    let primary = Arc::new(
        PrimaryStore::open(&config.snapshot_path())
            .with_context(|| format!("opening primary snapshot at {}", config.snapshot_path().display()))?,
    );
    let graph = Arc::new(
        GraphStore::open(&config.graph_snapshot_path())
            .with_context(|| format!("opening graph snapshot at {}", config.graph_snapshot_path().display()))?,
    );
    let ledger = Arc::new(ShadowLedger::new(config.ledger_dir()));
    let epochs = Arc::new(EpochService::new(
        project,
        Arc::clone(&ledger),
        config.epochs_dir(),
        provenance,
    ));
    let upserts = Arc::new(UpsertService::new(
        project,
        Arc::clone(&primary),
        Arc::clone(&ledger),
        Arc::clone(&epochs),
    ));
    Ok(Services {
        primary,
        graph,
        ledger,
        epochs,
        upserts,
    })
}

fn save_snapshots(config: &StoreConfig, services: &Services) -> Result<()> {
    services.primary.save(&config.snapshot_path())?;
    services.graph.save(&config.graph_snapshot_path())?;
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_run(
    config: &StoreConfig,
    project: &str,
    repo: &std::path::Path,
    brd: Option<&std::path::Path>,
    fail_fast: bool,
    sample: usize,
) -> Result<()> {
    let provenance = RunProvenance::capture(repo, brd);
    let services = open_services(config, project, provenance)?;

    let synchronizer = Arc::new(GraphSynchronizer::new(
        Arc::clone(&services.primary),
        Arc::clone(&services.graph),
    ));
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&services.primary),
        Arc::clone(&services.graph),
    ));
    let pipeline = Pipeline::new(
        PipelineConfig {
            project_id: project.to_string(),
            repo_root: repo.to_path_buf(),
            extractor_version: env!("CARGO_PKG_VERSION").to_string(),
            fail_fast,
            reconcile_sample: sample,
        },
        TypeRegistry::codebase_traceability(),
        Arc::clone(&services.upserts),
        Arc::clone(&services.epochs),
        Arc::clone(&services.ledger),
        synchronizer,
        reconciler,
    );

    let stages = vec![Stage::new(
        "filesystem-inventory",
        Box::new(FilesystemInventoryProvider::source_files()),
        RelationshipPolicy::ProvenanceCritical,
    )];

    println!("{} {} ({})", "Running".green().bold(), repo.display(), project);
    let report = pipeline.execute(&stages)?;
    save_snapshots(config, &services)?;

    for stage in &report.stages {
        let marker = if stage.success {
            "ok".green().bold()
        } else {
            "failed".red().bold()
        };
        println!(
            "  {} {} ({} entities, {} relationships, {:.1?})",
            marker, stage.name, stage.entities_created, stage.relationships_created, stage.duration
        );
        for warning in &stage.warnings {
            println!("    {} {}", "→".yellow(), warning);
        }
        for error in &stage.errors {
            println!("    {} {}", "→".red(), error);
        }
    }

    if let Some(epoch) = &report.epoch {
        println!("  {} epoch {}", "→".cyan(), epoch.epoch_id);
        if let Some(counts) = &epoch.counts {
            println!(
                "  {} {} created / {} updated entities, {} created / {} updated relationships",
                "→".cyan(),
                counts.entities_created,
                counts.entities_updated,
                counts.relationships_created,
                counts.relationships_updated
            );
        }
    }

    if report.success {
        println!("{}", "ok".green().bold());
        Ok(())
    } else {
        Err(anyhow!("pipeline run failed"))
    }
}

fn cmd_sync(config: &StoreConfig, project: &str, replace: bool) -> Result<()> {
    let services = open_services(config, project, RunProvenance::capture(&config.root, None))?;
    let synchronizer = GraphSynchronizer::new(Arc::clone(&services.primary), Arc::clone(&services.graph));

    let report = if replace {
        println!("{} {} (replace edges)", "Syncing".green().bold(), project);
        synchronizer.sync_replace_edges(project)
    } else {
        println!("{} {} (merge)", "Syncing".green().bold(), project);
        synchronizer.sync_merge(project)
    };
    save_snapshots(config, &services)?;

    println!("  {} {} synced, {} skipped", "→".cyan(), report.synced, report.skipped);
    if report.skipped > 0 {
        Err(anyhow!("{} records skipped during sync", report.skipped))
    } else {
        println!("{}", "ok".green().bold());
        Ok(())
    }
}

fn cmd_verify(
    config: &StoreConfig,
    project: &str,
    sample: usize,
    cap: usize,
    counts_only: bool,
) -> Result<()> {
    let services = open_services(config, project, RunProvenance::capture(&config.root, None))?;
    let reconciler = Reconciler::new(Arc::clone(&services.primary), Arc::clone(&services.graph))
        .with_report_cap(cap);

    if counts_only {
        let mismatches = reconciler.verify_counts_only(project);
        if mismatches.is_empty() {
            println!("{} counts agree", "ok".green().bold());
            return Ok(());
        }
        for m in &mismatches {
            println!(
                "  {} {:?} {}: primary={} secondary={}",
                "→".red(),
                m.kind,
                m.type_code,
                m.primary_count,
                m.secondary_count
            );
        }
        return Err(anyhow!("{} count mismatches", mismatches.len()));
    }

    let report = reconciler.verify_cross_store_consistency(project, sample);
    if report.consistent {
        println!("{} stores are consistent", "ok".green().bold());
        return Ok(());
    }

    for m in &report.count_mismatches {
        println!(
            "  {} count {:?} {}: primary={} secondary={}",
            "→".red(),
            m.kind,
            m.type_code,
            m.primary_count,
            m.secondary_count
        );
    }
    for d in &report.id_set_diffs {
        println!(
            "  {} id-set {:?} {}: only_in_primary={:?} only_in_secondary={:?}",
            "→".red(),
            d.kind,
            d.type_code,
            d.only_in_primary,
            d.only_in_secondary
        );
    }
    for t in &report.type_mismatches {
        println!(
            "  {} type {}: primary={} secondary={:?}",
            "→".red(),
            t.instance_id,
            t.primary_type,
            t.secondary_type
        );
    }
    Err(anyhow!("cross-store drift detected"))
}

fn cmd_ledger_tail(config: &StoreConfig, project: &str, lines: usize, lenient: bool) -> Result<()> {
    let ledger = ShadowLedger::new(config.ledger_dir());
    let entries = if lenient {
        let (entries, skipped) = ledger.read_all_lenient(project)?;
        if skipped > 0 {
            eprintln!("{} {} malformed lines skipped", "info:".yellow().bold(), skipped);
        }
        entries
    } else {
        ledger.read_all(project)?
    };

    let start = entries.len().saturating_sub(lines);
    for entry in &entries[start..] {
        println!("{}", serde_json::to_string(entry)?);
    }
    Ok(())
}

fn cmd_epochs_list(config: &StoreConfig, project: &str, limit: usize) -> Result<()> {
    let ledger = Arc::new(ShadowLedger::new(config.ledger_dir()));
    let epochs = EpochService::new(
        project,
        ledger,
        config.epochs_dir(),
        RunProvenance::capture(&config.root, None),
    );

    for epoch in epochs.list_epochs()?.into_iter().take(limit) {
        let status = match epoch.status {
            EpochStatus::Completed => "completed".green(),
            EpochStatus::Running => "running".yellow(),
            EpochStatus::Failed => "failed".red(),
        };
        let counts = epoch
            .counts
            .map(|c| {
                format!(
                    " ({}+{} entities, {}+{} relationships)",
                    c.entities_created, c.entities_updated, c.relationships_created, c.relationships_updated
                )
            })
            .unwrap_or_default();
        println!(
            "  {} {} {} {}{}",
            "→".cyan(),
            epoch.epoch_id,
            status,
            epoch.started_at.to_rfc3339(),
            counts
        );
    }
    Ok(())
}

fn cmd_epochs_show(config: &StoreConfig, project: &str, epoch_id: Uuid) -> Result<()> {
    let ledger = Arc::new(ShadowLedger::new(config.ledger_dir()));
    let epochs = EpochService::new(
        project,
        ledger,
        config.epochs_dir(),
        RunProvenance::capture(&config.root, None),
    );
    let epoch = epochs.get_epoch(epoch_id)?;
    println!("{}", serde_json::to_string_pretty(&epoch)?);
    Ok(())
}

fn cmd_stats(config: &StoreConfig, project: &str) -> Result<()> {
    let primary = PrimaryStore::open(&config.snapshot_path())?;

    println!("{} {}", "Entities".green().bold(), project);
    for (type_code, count) in primary.count_entities_by_type(project) {
        println!("  {} {:<20} {}", "→".cyan(), type_code, count);
    }
    println!("{} {}", "Relationships".green().bold(), project);
    for (type_code, count) in primary.count_relationships_by_type(project) {
        println!("  {} {:<20} {}", "→".cyan(), type_code, count);
    }
    Ok(())
}
