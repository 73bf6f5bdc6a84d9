mod serve;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::WrapErr;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use strata_core::{
    ChunkOutcome, ChunkRequest, CommitMode, Config, PipelineContext, ScanRequest, ScanSession,
};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Scan files, interpret them under resource limits, and project the results into SQLite and a graph", long_about = None)]
struct Cli {
    /// Config file (default: ./strata.toml, then ~/.config/strata/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enumerate a directory into a scan session
    Scan {
        path: String,
        /// Only the top-level directory
        #[arg(long)]
        no_recursive: bool,
        /// Interpret every row after enumeration
        #[arg(long)]
        interpret: bool,
    },
    /// Interpret rows of a session, one chunk or all of them
    Interpret {
        id: String,
        /// Resume after this row id
        #[arg(long)]
        after: Option<i64>,
        #[arg(long)]
        max_files: Option<usize>,
        /// Glob a path must match (repeatable)
        #[arg(long)]
        include: Vec<String>,
        /// Glob that skips a path (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
        /// Skip files larger than this many bytes
        #[arg(long)]
        max_size: Option<u64>,
        /// Re-run rows that already have a result
        #[arg(long)]
        overwrite: bool,
        /// Keep going until no rows remain
        #[arg(long)]
        all: bool,
    },
    /// Project a session into the graph and verify it
    Commit {
        id: String,
        /// Re-project every row, not just new ones
        #[arg(long)]
        full: bool,
    },
    /// Show a session's counters and graph state
    Status { id: String },
    /// List recent sessions
    Sessions {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Cancel a running session
    Cancel { id: String },
    /// List registered interpreters and rules
    Interpreters,
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value_t = 3333)]
        port: u16,
        #[arg(long, default_value = "127.0.0.1")]
        host: std::net::IpAddr,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .wrap_err_with(|| format!("loading {}", path.display()))?,
        None => Config::load().wrap_err("loading configuration")?,
    };
    let pipeline = PipelineContext::open(config)
        .await
        .wrap_err("opening the pipeline")?;

    match cli.command {
        Commands::Scan {
            path,
            no_recursive,
            interpret,
        } => {
            let request = ScanRequest::new(path)
                .recursive(!no_recursive)
                .interpret(interpret);
            let spinner = spinner(format!("Scanning {}", request.root));
            let report = pipeline.scan(&request).await;
            spinner.finish_and_clear();
            let report = report?;

            if cli.json {
                return print_json(&report);
            }
            print_session(&report.session);
            println!(
                "  Enumerated: {} files ({} new, {} skipped)",
                report.files_enumerated, report.new_rows, report.skipped_entries
            );
            if let Some(outcome) = &report.interpretation {
                print_outcome(outcome);
            }
        }
        Commands::Interpret {
            id,
            after,
            max_files,
            include,
            exclude,
            max_size,
            overwrite,
            all,
        } => {
            let request = ChunkRequest {
                after_rowid: after,
                max_files,
                include,
                exclude,
                max_size_bytes: max_size,
                overwrite,
            };
            let spinner = spinner(format!("Interpreting {}", id));
            let outcome = if all {
                pipeline.interpret_all(&id, &request).await
            } else {
                pipeline.interpret(&id, &request).await
            };
            spinner.finish_and_clear();
            let outcome = outcome?;

            if cli.json {
                return print_json(&outcome);
            }
            print_outcome(&outcome);
        }
        Commands::Commit { id, full } => {
            let mode = if full {
                CommitMode::Full
            } else {
                CommitMode::Incremental
            };
            let spinner = spinner(format!("Committing {}", id));
            let result = pipeline.commit_and_verify(&id, mode).await;
            spinner.finish_and_clear();
            let (summary, report) = result?;

            if cli.json {
                return print_json(&serde_json::json!({
                    "commit": summary,
                    "verification": report,
                }));
            }
            println!("Committed session {}", summary.session_id);
            println!("  Rows projected: {}", summary.rows_projected);
            println!(
                "  Upserted: {} nodes, {} relationships",
                summary.nodes_upserted, summary.relationships_upserted
            );
            println!("  High-water row: {}", summary.high_water_row_id);
            if report.is_consistent() {
                println!("  Verified: graph matches the store");
            } else {
                println!("  Discrepancies:");
                for d in &report.discrepancies {
                    println!("    {}: expected {}, found {}", d.name, d.expected, d.observed);
                }
            }
        }
        Commands::Status { id } => {
            let report = pipeline.status(&id)?;
            if cli.json {
                return print_json(&report);
            }
            print_session(&report.session);
            println!("  Rows: {}", report.row_count);
            match &report.graph {
                Some(graph) => println!(
                    "  Graph: {} (high-water row {})",
                    graph.state.as_str(),
                    graph.high_water_row_id
                ),
                None => println!("  Graph: not committed"),
            }
        }
        Commands::Sessions { limit } => {
            let sessions = pipeline.sessions(limit)?;
            if cli.json {
                return print_json(&sessions);
            }
            if sessions.is_empty() {
                println!("No sessions yet. Use 'strata scan <path>' to start one.");
            }
            for s in &sessions {
                println!(
                    "{}  {:<9}  {:>7} files  {}",
                    s.id, s.status, s.files_seen, s.root
                );
            }
        }
        Commands::Cancel { id } => {
            let session = pipeline.cancel(&id)?;
            if cli.json {
                return print_json(&session);
            }
            println!("Session {} is {}", session.id, session.status);
        }
        Commands::Interpreters => {
            let registry = pipeline.registry();
            if cli.json {
                let defs: Vec<_> = registry
                    .definitions()
                    .iter()
                    .map(|d| {
                        serde_json::json!({
                            "id": d.id,
                            "version": d.version,
                            "name": d.name,
                            "runtime": d.runtime,
                            "extensions": d.extensions,
                        })
                    })
                    .collect();
                return print_json(&defs);
            }
            for d in registry.definitions() {
                println!(
                    "{:<12} {:<8} {:<14} {}",
                    d.id,
                    d.version,
                    d.runtime,
                    d.extensions.join(" ")
                );
            }
            let rules = registry.rules();
            if !rules.is_empty() {
                println!("\nRules (highest priority first):");
                for r in rules {
                    println!("  {:<20} priority {:>4} -> {}", r.id, r.priority, r.target);
                }
            }
        }
        Commands::Serve { port, host } => {
            serve::start_server(Arc::new(pipeline), serve::ServeConfig { host, port }).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("STRATA_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn print_json<T: Serialize>(value: &T) -> color_eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_session(session: &ScanSession) {
    println!("Session {}", session.id);
    println!("  Root: {}", session.root);
    println!("  Status: {}", session.status);
    println!(
        "  Files: {} ({} bytes), interpreted {}, errors {}",
        session.files_seen, session.bytes_seen, session.interpreted_count, session.error_count
    );
}

fn print_outcome(outcome: &ChunkOutcome) {
    println!(
        "  Interpreted: {} ({} errors)",
        outcome.processed_count, outcome.error_count
    );
    for (kind, n) in &outcome.errors_by_kind {
        println!("    {}: {}", kind, n);
    }
    println!(
        "  Skipped: {} existing, {} uninterpreted, {} by size, {} by pattern",
        outcome.skipped_existing,
        outcome.uninterpreted,
        outcome.filtered_by_size,
        outcome.filtered_by_include
    );
    match outcome.next_cursor {
        Some(cursor) => println!("  More rows remain; resume with --after {}", cursor),
        None => println!("  No rows remain"),
    }
}
