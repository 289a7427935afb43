//! geomerge command-line tool.
//!
//! Merges JSON graph snapshots, checks a snapshot for consistency, and
//! generates / validates configuration files.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use geomerge_core::config::{AppConfig, OutputFormat, DEFAULT_CONFIG_TEMPLATE};
use geomerge_core::graph::DanglingReference;
use geomerge_core::merger::MergeStats;
use geomerge_core::{snapshot, Conflict, Graph, GraphMerger, PrimitiveId, PrimitiveKind};

/// Exit status of a merge that recorded conflicts with `fail_on_conflicts` set.
const EXIT_CONFLICTS: u8 = 2;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// geomerge command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "geomerge",
    version,
    about = "Merge point/path/group datasets and inspect the result"
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply if it is missing.
    #[arg(short, long, global = true, default_value = "./geomerge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merge a source snapshot onto a target snapshot.
    Merge {
        /// Snapshot receiving the changes.
        #[arg(short, long)]
        target: PathBuf,

        /// Snapshot whose changes are merged in.
        #[arg(short, long)]
        source: PathBuf,

        /// Where to write the merged graph.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load a snapshot and report its contents and dangling references.
    Check {
        /// Snapshot to check.
        snapshot: PathBuf,

        /// Also list points ordered by position.
        #[arg(long)]
        points: bool,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./geomerge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Init { output } => {
            init_logging("warn");
            cmd_init(&output)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate => {
            init_logging("warn");
            cmd_validate(&cli.config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Merge {
            target,
            source,
            output,
        } => {
            let config = load_config(&cli.config)?;
            init_logging(&config.logging.level);
            cmd_merge(&config, &target, &source, output.as_deref())
        }
        Commands::Check { snapshot, points } => {
            let config = load_config(&cli.config)?;
            init_logging(&config.logging.level);
            cmd_check(&config, &snapshot, points)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_or_default(path).context("failed to load configuration file")
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct MergeReport<'a> {
    target: String,
    source: String,
    output: Option<String>,
    objects: usize,
    stats: &'a MergeStats,
    conflicts: &'a [Conflict],
}

#[derive(Serialize)]
struct CheckReport {
    snapshot: String,
    points: usize,
    paths: usize,
    groups: usize,
    new: usize,
    modified: usize,
    deleted: usize,
    incomplete: usize,
    dangling: Vec<DanglingReference>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    points_by_position: Vec<PointLine>,
}

#[derive(Serialize)]
struct PointLine {
    id: PrimitiveId,
    lat: Option<f64>,
    lon: Option<f64>,
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("failed to serialize report")?;
    println!("{}", json);
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_merge(config: &AppConfig, target_path: &Path, source_path: &Path, output: Option<&Path>) -> Result<ExitCode> {
    let target = snapshot::load_graph(target_path)
        .with_context(|| format!("failed to load target snapshot {}", target_path.display()))?;
    let source = snapshot::load_graph(source_path)
        .with_context(|| format!("failed to load source snapshot {}", source_path.display()))?;

    let mut merger = GraphMerger::new(target, &source);
    merger.merge().context("merge aborted")?;

    let written = match output {
        Some(path) if config.merge.write_result => {
            snapshot::save_graph(merger.result_graph(), path, config.output.pretty)
                .with_context(|| format!("failed to write merged snapshot {}", path.display()))?;
            info!(path = %path.display(), "merged graph written");
            Some(path)
        }
        _ => None,
    };

    let conflicts = merger.conflicts();
    match config.output.format {
        OutputFormat::Json => {
            let report = MergeReport {
                target: target_path.display().to_string(),
                source: source_path.display().to_string(),
                output: written.map(|p| p.display().to_string()),
                objects: merger.result_graph().len(),
                stats: merger.stats(),
                conflicts: conflicts.all(),
            };
            print_json(&report, config.output.pretty)?;
        }
        OutputFormat::Text => {
            let stats = merger.stats();
            println!("Merge Summary");
            println!("=============");
            println!();
            println!("  Merged by id   : {}", stats.merged_by_id);
            println!("  Matched new    : {}", stats.matched_new);
            println!("  Cloned         : {}", stats.cloned);
            println!("  Skipped        : {}", stats.skipped);
            println!("  Deleted        : {} ({} in cycles)", stats.deleted, stats.force_deleted);
            println!("  Conflicts      : {}", conflicts.len());
            println!("  Result objects : {}", merger.result_graph().len());
            if let Some(path) = written {
                println!("  Written to     : {}", path.display());
            }

            if !conflicts.is_empty() {
                println!();
                println!("{:<38} {:<16} {:<16} {:<6}", "ID", "MINE", "THEIRS", "SIDE");
                println!("{}", "-".repeat(80));
                for c in conflicts.iter() {
                    println!(
                        "{:<38} {:<16} {:<16} {:<6}",
                        c.id,
                        c.mine().to_string(),
                        c.theirs().primitive_id().to_string(),
                        if c.is_my_side() { "mine" } else { "theirs" },
                    );
                }
            }
        }
    }

    if config.merge.fail_on_conflicts && !conflicts.is_empty() {
        return Ok(ExitCode::from(EXIT_CONFLICTS));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_check(config: &AppConfig, path: &Path, list_points: bool) -> Result<()> {
    let graph = snapshot::load_graph(path).with_context(|| format!("failed to load snapshot {}", path.display()))?;
    let report = check_report(&graph, path, list_points);

    match config.output.format {
        OutputFormat::Json => print_json(&report, config.output.pretty)?,
        OutputFormat::Text => {
            println!("Snapshot: {}", report.snapshot);
            println!();
            println!("  Points     : {}", report.points);
            println!("  Paths      : {}", report.paths);
            println!("  Groups     : {}", report.groups);
            println!("  New        : {}", report.new);
            println!("  Modified   : {}", report.modified);
            println!("  Deleted    : {}", report.deleted);
            println!("  Incomplete : {}", report.incomplete);
            println!();
            if !report.points_by_position.is_empty() {
                println!("{:<16} {:>14} {:>14}", "POINT", "LAT", "LON");
                println!("{}", "-".repeat(46));
                for p in &report.points_by_position {
                    println!(
                        "{:<16} {:>14} {:>14}",
                        p.id.to_string(),
                        p.lat.map_or_else(|| "-".to_string(), |v| format!("{:.7}", v)),
                        p.lon.map_or_else(|| "-".to_string(), |v| format!("{:.7}", v)),
                    );
                }
                println!();
            }
            if report.dangling.is_empty() {
                println!("No dangling references.");
            } else {
                for d in &report.dangling {
                    println!("  [FAIL] {} references missing {}", d.owner, d.target);
                }
            }
        }
    }

    if !report.dangling.is_empty() {
        anyhow::bail!("{} dangling reference(s)", report.dangling.len());
    }
    Ok(())
}

fn check_report(graph: &Graph, path: &Path, list_points: bool) -> CheckReport {
    let points_by_position = if list_points {
        graph
            .points_by_position()
            .into_iter()
            .map(|id| {
                let coord = graph.get(id).and_then(|p| p.coordinate());
                PointLine {
                    id,
                    lat: coord.map(|c| c.lat),
                    lon: coord.map(|c| c.lon),
                }
            })
            .collect()
    } else {
        Vec::new()
    };
    CheckReport {
        snapshot: path.display().to_string(),
        points: graph.all_of(PrimitiveKind::Point).count(),
        paths: graph.all_of(PrimitiveKind::Path).count(),
        groups: graph.all_of(PrimitiveKind::Group).count(),
        new: graph.iter().filter(|p| p.is_new()).count(),
        modified: graph.iter().filter(|p| p.is_modified()).count(),
        deleted: graph.iter().filter(|p| p.is_deleted()).count(),
        incomplete: graph.iter().filter(|p| p.is_incomplete()).count(),
        dangling: graph.check_references(),
        points_by_position,
    }
}

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG_TEMPLATE).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file to choose log level and report format");
    println!("  2. Validate with: geomerge validate --config {}", output.display());
    println!(
        "  3. Merge: geomerge merge --config {} --target mine.json --source theirs.json --output merged.json",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config = AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.validate() {
        Ok(()) => println!("  [OK] All fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration is invalid");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Log level         : {}", config.logging.level);
    println!("  Fail on conflicts : {}", config.merge.fail_on_conflicts);
    println!("  Write result      : {}", config.merge.write_result);
    println!("  Output format     : {:?}", config.output.format);
    println!("  Pretty output     : {}", config.output.pretty);
    println!();
    println!("Configuration is valid.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geomerge_core::{Coordinate, Primitive};

    #[test]
    fn test_cli_parses_merge() {
        let cli = Cli::try_parse_from([
            "geomerge", "merge", "--target", "a.json", "--source", "b.json", "-o", "c.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Merge { target, source, output } => {
                assert_eq!(target, PathBuf::from("a.json"));
                assert_eq!(source, PathBuf::from("b.json"));
                assert_eq!(output, Some(PathBuf::from("c.json")));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.config, PathBuf::from("./geomerge.toml"));
    }

    #[test]
    fn test_cli_requires_source() {
        assert!(Cli::try_parse_from(["geomerge", "merge", "--target", "a.json"]).is_err());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geomerge.toml");
        cmd_init(&path).unwrap();
        assert!(AppConfig::load_from_file(&path).is_ok());
        assert!(cmd_init(&path).is_err());
    }

    #[test]
    fn test_merge_exit_code_on_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.json");
        let source = dir.path().join("source.json");
        let mine = Graph::from_primitives(vec![Primitive::point(1, Coordinate::new(0.0, 0.0))
            .with_version(2)
            .with_tag("name", "mine")
            .with_modified(true)])
        .unwrap();
        let theirs = Graph::from_primitives(vec![Primitive::point(1, Coordinate::new(0.0, 0.0))
            .with_version(2)
            .with_tag("name", "theirs")
            .with_modified(true)])
        .unwrap();
        snapshot::save_graph(&mine, &target, false).unwrap();
        snapshot::save_graph(&theirs, &source, false).unwrap();

        let mut config = AppConfig::default();
        assert_eq!(cmd_merge(&config, &target, &source, None).unwrap(), ExitCode::SUCCESS);

        config.merge.fail_on_conflicts = true;
        assert_eq!(
            cmd_merge(&config, &target, &source, None).unwrap(),
            ExitCode::from(EXIT_CONFLICTS)
        );
    }

    #[test]
    fn test_check_report_counts() {
        let graph = Graph::from_primitives(vec![
            Primitive::point(1, Coordinate::new(0.0, 0.0)).with_version(1),
            Primitive::point(-1, Coordinate::new(0.0, 1.0)).with_modified(true),
            Primitive::path(3, [1, -1]).with_version(1),
        ])
        .unwrap();
        let report = check_report(&graph, Path::new("g.json"), false);
        assert_eq!(report.points, 2);
        assert_eq!(report.paths, 1);
        assert_eq!(report.new, 1);
        assert_eq!(report.modified, 1);
        assert!(report.dangling.is_empty());
        assert!(report.points_by_position.is_empty());
    }

    #[test]
    fn test_check_report_lists_points_by_position() {
        let graph = Graph::from_primitives(vec![
            Primitive::point(1, Coordinate::new(2.0, 0.0)),
            Primitive::point(2, Coordinate::new(1.0, 5.0)),
            Primitive::point(3, Coordinate::new(1.0, 4.0)),
        ])
        .unwrap();
        let report = check_report(&graph, Path::new("g.json"), true);
        let order: Vec<i64> = report.points_by_position.iter().map(|p| p.id.id).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }
}
