use std::fs;
use std::fs::File;
use std::io::{self, stdout, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry};

use canopy::cigar::CigarTree;
use canopy::errors::CanopyError;
use canopy::expand::expand;
use canopy::io::history::{
    history_to_json, load_history, load_history_json, save_history, save_history_json,
    HistoryNode,
};
use canopy::io::{fasta, newick, open_reader, read_model};
use canopy::likelihood;
use canopy::tree::Tree;

/// Any object that supports writing and checking if it is a terminal.
trait Output: Write + IsTerminal {}
impl<T> Output for T where T: Write + IsTerminal {}

/// On-disk formats for a stored alignment history
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum HistoryFormat {
    /// Compact binary history file
    Binary,

    /// Nested JSON, one object per tree node
    Json,
}

/// The output formats supported by the view subcommand
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum ViewOutputType {
    /// Nested JSON, one object per tree node
    Json,

    /// The expanded leaf alignment in FASTA format
    Fasta,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct CliArgs {
    /// Set verbosity level. Use multiple times to increase the verbosity level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<CliSubcommand>,
}

#[derive(Subcommand, Debug)]
enum CliSubcommand {
    /// Score an alignment history under a substitution and indel model
    Score(ScoreArgs),

    /// Build an alignment history from a tree and a gapped alignment
    Build(BuildArgs),

    /// Convert a stored alignment history to other formats
    View(ViewArgs),
}

#[derive(Args, Debug)]
struct ScoreArgs {
    /// Phylogenetic tree in Newick format.
    #[arg(short, long)]
    #[clap(help_heading = "Inputs")]
    tree: PathBuf,

    /// Gapped alignment in FASTA format. Record names must match the tree's
    /// leaf names.
    #[arg(short, long)]
    #[clap(help_heading = "Inputs")]
    alignment: PathBuf,

    /// Model parameters in historian JSON format.
    #[arg(short, long)]
    #[clap(help_heading = "Inputs")]
    model: PathBuf,

    #[arg(short = 'j', long, default_value = "1")]
    #[clap(help_heading = "Processing")]
    num_threads: Option<usize>,

    /// Include the per-column substitution terms in the report.
    #[arg(long)]
    #[clap(help_heading = "Outputs")]
    per_column: bool,

    /// Include the per-branch indel terms in the report.
    #[arg(long)]
    #[clap(help_heading = "Outputs")]
    per_branch: bool,

    /// Output filename. If not given, defaults to stdout
    #[arg(short, long)]
    #[clap(help_heading = "Outputs")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Phylogenetic tree in Newick format.
    #[arg(short, long)]
    #[clap(help_heading = "Inputs")]
    tree: PathBuf,

    /// Gapped alignment in FASTA format.
    #[arg(short, long)]
    #[clap(help_heading = "Inputs")]
    alignment: PathBuf,

    /// History file format.
    #[arg(value_enum, short, long)]
    #[clap(help_heading = "Outputs")]
    format: Option<HistoryFormat>,

    /// Output filename. If not given, defaults to stdout
    #[arg(short, long)]
    #[clap(help_heading = "Outputs")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ViewArgs {
    /// Stored alignment history, binary or JSON (by .json / .json.gz suffix).
    #[clap(help_heading = "Inputs")]
    history: PathBuf,

    /// Output file type.
    #[arg(value_enum, short = 'O', long)]
    #[clap(help_heading = "Outputs")]
    output_type: Option<ViewOutputType>,

    /// Output filename. If not given, defaults to stdout
    #[arg(short, long)]
    #[clap(help_heading = "Outputs")]
    output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct LogLikeReport {
    subs: f64,
    indels: f64,
    total: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    subs_by_column: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    indels_by_branch: Option<Vec<f64>>,
}

#[derive(Debug, Serialize)]
struct ScoreReport {
    loglike: LogLikeReport,
    cigartree: HistoryNode,
}

/// Build our base tracing subscriber with stderr logging.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap();

    let stderr_log = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_filter(filter_layer);

    Registry::default().with(stderr_log).init();
}

fn read_tree(path: &Path) -> Result<Tree> {
    let mut text = String::new();
    open_reader(path)?
        .read_to_string(&mut text)
        .with_context(|| format!("Could not read tree file {path:?}"))?;
    Ok(newick::parse_newick(&text)?)
}

fn make_writer(output: Option<&PathBuf>) -> Result<Box<dyn Output>> {
    let writer: Box<dyn Output> = if let Some(path) = output {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?
        }

        let file = File::create(path)?;
        Box::new(file) as Box<dyn Output>
    } else {
        Box::new(stdout()) as Box<dyn Output>
    };
    Ok(writer)
}

fn load_any_history(path: &Path) -> Result<CigarTree> {
    let name = path
        .file_name()
        .map(|v| v.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stripped = name.strip_suffix(".gz").unwrap_or(&name);

    let reader = open_reader(path)?;
    let history = if stripped.ends_with(".json") {
        load_history_json(reader)?
    } else {
        load_history(reader)?
    };
    Ok(history)
}

fn score_subcommand(score_args: &ScoreArgs) -> Result<()> {
    let tree = read_tree(&score_args.tree)?;
    let rows = fasta::read_alignment(&score_args.alignment)?;
    let model = read_model(&score_args.model)?;

    let history = CigarTree::from_alignment(&tree, &rows)?;
    let evaluation = likelihood::evaluate(
        &history,
        &model,
        score_args.num_threads.unwrap_or(1),
    )?;
    info!(
        "scored {} columns over {} nodes, total log-likelihood {}",
        evaluation.sub_per_column.len(),
        tree.len(),
        evaluation.total()
    );

    let report = ScoreReport {
        loglike: LogLikeReport {
            subs: evaluation.sub_total,
            indels: evaluation.indel_total,
            total: evaluation.total(),
            subs_by_column: score_args.per_column.then_some(evaluation.sub_per_column),
            indels_by_branch: score_args.per_branch.then_some(evaluation.indel_per_branch),
        },
        cigartree: history_to_json(&history),
    };

    let mut writer = make_writer(score_args.output.as_ref())?;
    serde_json::to_writer_pretty(&mut writer, &report)?;
    writeln!(writer)?;

    Ok(())
}

fn build_subcommand(build_args: &BuildArgs) -> Result<()> {
    let tree = read_tree(&build_args.tree)?;
    let rows = fasta::read_alignment(&build_args.alignment)?;
    let history = CigarTree::from_alignment(&tree, &rows)?;

    let writer = make_writer(build_args.output.as_ref())?;
    match build_args.format.unwrap_or(HistoryFormat::Binary) {
        HistoryFormat::Binary => {
            if !writer.is_terminal() {
                save_history(&history, writer)?
            } else {
                eprintln!("WARNING: not writing binary history data to terminal standard output!");
            }
        }
        HistoryFormat::Json => save_history_json(&history, writer)?,
    }

    Ok(())
}

fn view_subcommand(view_args: &ViewArgs) -> Result<()> {
    let history = load_any_history(&view_args.history)?;

    let writer = make_writer(view_args.output.as_ref())?;
    match view_args.output_type.unwrap_or(ViewOutputType::Json) {
        ViewOutputType::Json => save_history_json(&history, writer)?,
        ViewOutputType::Fasta => {
            let expanded = expand(&history)?;
            let tree = history.tree();
            let rows: Vec<(String, String)> = tree
                .leaves()
                .map(|ix| {
                    let name = tree
                        .name(ix)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("node{ix}"));
                    (name, expanded.rows[ix].clone())
                })
                .collect();
            fasta::write_alignment(&rows, writer)?
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.verbose);

    match &args.command {
        Some(CliSubcommand::Score(v)) => score_subcommand(v)?,
        Some(CliSubcommand::Build(v)) => build_subcommand(v)?,
        Some(CliSubcommand::View(v)) => view_subcommand(v)?,
        None => {
            eprintln!("No subcommand given!");

            Err(CanopyError::Other)?
        }
    };

    Ok(())
}
