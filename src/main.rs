mod config;
mod db;
mod enrich;
mod error;
mod extract;
mod mapper;
mod pipeline;
mod registry;

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ctgov_etl", about = "Clinical trial registry extraction and storage pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Download raw study documents from the registry by NCT id
    Fetch {
        /// Study identifiers, e.g. NCT00001372
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Extract documents to JSON artifacts without touching the database
    Extract {
        /// Input file or directory of registry documents
        input: PathBuf,
    },
    /// Extract, enrich and store documents in one pipeline
    Run {
        /// Input file or directory of registry documents
        input: PathBuf,
        /// Store extraction-only records without calling the analysis service
        #[arg(long)]
        skip_enrichment: bool,
        /// Max documents to process (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Remove stale artifacts from the output directory first
        #[arg(long)]
        clean: bool,
    },
    /// Show storage statistics
    Stats,
    /// Stored trials overview table
    Overview {
        /// Filter by status (case-insensitive, e.g. RECRUITING)
        #[arg(short, long)]
        status: Option<String>,
        /// Filter by phase substring (e.g. PHASE2)
        #[arg(short, long)]
        phase: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Ranked full-text search over stored trials
    Search {
        /// Query terms (all must match)
        query: String,
        /// Max hits to display
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Print one stored trial as JSON
    Show {
        /// Trial identifier, e.g. NCT00001372
        nct_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => {
            let settings = config::load()?;
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            println!("Database ready at {}", settings.db_path);
            Ok(())
        }
        Commands::Fetch { ids } => {
            let settings = config::load()?;
            let counts = pipeline::fetch_studies(&settings, &ids).await?;
            counts.print();
            Ok(())
        }
        Commands::Extract { input } => {
            let settings = config::load()?;
            println!("Extracting from {}...", input.display());
            let counts = pipeline::extract_batch(&input, Path::new(&settings.out_dir))?;
            counts.print();
            Ok(())
        }
        Commands::Run {
            input,
            skip_enrichment,
            limit,
            clean,
        } => {
            let settings = config::load()?;
            let opts = pipeline::RunOptions {
                skip_enrichment,
                limit,
                clean,
            };
            let summary = pipeline::run_batch(&settings, &input, &opts).await?;
            summary.print();
            Ok(())
        }
        Commands::Stats => {
            let settings = config::load()?;
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            if s.total == 0 {
                println!("No trials stored. Run 'run' first.");
                return Ok(());
            }
            println!("Total:           {}", s.total);
            println!("Enriched:        {}", s.enriched);
            println!("Extraction only: {}", s.extraction_only);
            println!("\nBy status:");
            for (status, count) in &s.by_status {
                println!("  {:<24} {:>6}", status, count);
            }
            Ok(())
        }
        Commands::Overview {
            status,
            phase,
            limit,
        } => {
            let settings = config::load()?;
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let rows = db::fetch_overview(&conn, status.as_deref(), phase.as_deref(), limit)?;
            if rows.is_empty() {
                println!("No trials found.");
                return Ok(());
            }

            // Compact, readable table
            println!(
                "{:>3} | {:<11} | {:<26} | {:<18} | {:<10} | {:<14} | {:>6} | {:<10}",
                "#", "NCT id", "Title", "Status", "Phase", "Type", "Enroll", "Start"
            );
            println!("{}", "-".repeat(119));

            for (i, r) in rows.iter().enumerate() {
                let title = truncate(&r.brief_title, 26);
                let status = truncate(&r.status, 18);
                let phase = truncate(&r.phase, 10);
                let study_type = truncate(&r.study_type, 14);
                let enroll = r
                    .target_enrollment
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".into());

                println!(
                    "{:>3} | {:<11} | {:<26} | {:<18} | {:<10} | {:<14} | {:>6} | {:<10}",
                    i + 1,
                    r.nct_id,
                    title,
                    status,
                    phase,
                    study_type,
                    enroll,
                    r.start_date
                );
            }

            // Sponsors in a separate section to keep the table narrow
            let with_sponsor: Vec<_> = rows
                .iter()
                .filter(|r| !r.primary_sponsor.is_empty())
                .collect();
            if !with_sponsor.is_empty() {
                println!("\n--- Sponsors ---");
                for r in &with_sponsor {
                    println!("  {}: {}", r.nct_id, truncate(&r.primary_sponsor, 60));
                }
            }

            println!("\n{} trials", rows.len());
            Ok(())
        }
        Commands::Show { nct_id } => {
            let settings = config::load()?;
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            match db::fetch_canonical(&conn, &nct_id.trim().to_uppercase())? {
                Some(doc) => println!("{}", serde_json::to_string_pretty(&doc)?),
                None => println!("No stored trial with id {}.", nct_id),
            }
            Ok(())
        }
        Commands::Search { query, limit } => {
            let settings = config::load()?;
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let hits = db::search(&conn, &query, limit)?;
            if hits.is_empty() {
                println!("No matches for '{}'.", query);
                return Ok(());
            }
            println!(
                "{:>3}  {:<11} | {:<44} | {:<18} | {:<10} | {:>6}",
                "#", "NCT id", "Title", "Status", "Phase", "Rank"
            );
            println!("{}", "-".repeat(106));
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{:>3}. {:<11} | {:<44} | {:<18} | {:<10} | {:>6.1}",
                    i + 1,
                    hit.nct_id,
                    truncate(&hit.brief_title, 44),
                    truncate(&hit.status, 18),
                    truncate(&hit.phase, 10),
                    hit.rank
                );
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
