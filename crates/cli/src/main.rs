//! bidsconv CLI - DICOM to BIDS conversion.

use anyhow::{Context, Result};
use bidsconv_core::{ReferenceSpan, SeriesIndex, SubjectSpec};
use bidsconv_naming::NamingEngine;
use bidsconv_rules::ConfigTable;
use bidsconv_storage::{DatasetStore, DatasetTree, DescriptionUpdate};
use bidsconv_tools::Dcm2NiixTool;
use bidsconv_transfer::{
    classify_subject, AssumeYes, Confirm, PipelineConfig, SubjectPlan, TransferConfig,
    TransferOrchestrator,
};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bidsconv")]
#[command(about = "Convert DICOM series into a BIDS dataset", long_about = None)]
struct Cli {
    /// Pipeline configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a subject folder and write a plan
    Classify {
        /// DICOM source folder
        source: PathBuf,
        /// Subject number
        #[arg(long)]
        subject: u32,
        /// Group prefix
        #[arg(long, default_value = "")]
        group: String,
        /// Session label
        #[arg(long)]
        session: Option<String>,
        /// Task name, as INDEX=NAME
        #[arg(long = "task", value_name = "INDEX=NAME")]
        tasks: Vec<String>,
        /// Run number, as INDEX=N
        #[arg(long = "run", value_name = "INDEX=N")]
        runs: Vec<String>,
        /// Fieldmap reference, as INDEX=SPAN (e.g. 4=1-3)
        #[arg(long = "reference", value_name = "INDEX=SPAN")]
        references: Vec<String>,
        /// Plan output file (stdout when omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Check destination names of a plan without writing
    Check {
        /// Plan file
        plan: PathBuf,
        /// Also check against files in this dataset
        #[arg(long)]
        dataset: Option<PathBuf>,
    },
    /// Convert a plan into a dataset
    Transfer {
        /// Plan file
        plan: PathBuf,
        /// Dataset root
        dataset: PathBuf,
        /// Answer yes to every question
        #[arg(long, short)]
        yes: bool,
    },
    /// Edit dataset_description.json
    Describe {
        /// Dataset root
        dataset: PathBuf,
        /// Name
        #[arg(long)]
        name: Option<String>,
        /// BIDSVersion
        #[arg(long)]
        bids_version: Option<String>,
        /// License
        #[arg(long)]
        license: Option<String>,
        /// Author (repeatable)
        #[arg(long = "author")]
        authors: Vec<String>,
        /// Acknowledgements
        #[arg(long)]
        acknowledgements: Option<String>,
        /// HowToAcknowledge
        #[arg(long)]
        how_to_acknowledge: Option<String>,
        /// Funding source (repeatable)
        #[arg(long = "funding")]
        funding: Vec<String>,
        /// Reference or link (repeatable)
        #[arg(long = "reference")]
        references: Vec<String>,
        /// DatasetDOI
        #[arg(long)]
        doi: Option<String>,
    },
    /// Write a template configuration table
    Init {
        /// Target file
        #[arg(default_value = "config.toml")]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Asks on the terminal; anything but y/yes is no.
struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, question: &str) -> bool {
        print!("{} [y/N] ", question);
        if std::io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match std::io::stdin().lock().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Classify { source, subject, group, session, tasks, runs, references, output } => {
            let mut spec = SubjectSpec::new(subject).with_group(group);
            if let Some(session) = session {
                spec = spec.with_session(session);
            }

            let mut plan = classify_subject(&config, &source, spec)?;
            apply_overrides(&mut plan, &tasks, &runs, &references)?;
            print_plan(&plan);

            let json = plan.to_json()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!("Plan written to {}", path.display());
                }
                None => println!("{}", json),
            }
        }
        Commands::Check { plan, dataset } => {
            let plan = read_plan(&plan)?;
            let engine = NamingEngine::new(plan.subject.clone());
            let inputs = plan.naming_inputs();
            let names = match &dataset {
                Some(root) => engine.check_against_tree(&inputs, root)?,
                None => engine.check(&inputs)?,
            };

            println!("Destinations ({})", names.entries.len());
            for entry in &names.entries {
                println!("  [{}] {}", entry.index, entry.folder.join(&entry.stem).display());
            }
            for warning in &names.unknown_labels {
                println!(
                    "  series {}: {:?} is not a known {} label",
                    warning.index, warning.label, warning.category
                );
            }
        }
        Commands::Transfer { plan, dataset, yes } => {
            let plan = read_plan(&plan)?;
            let tree = DatasetTree::new(&dataset).await?;
            let converter = Dcm2NiixTool::with_config(config.converter.clone());
            let mut orchestrator = TransferOrchestrator::new(tree, converter)
                .with_config(TransferConfig::from(&config));

            let report = if yes {
                orchestrator.transfer(&plan, &AssumeYes).await?
            } else {
                orchestrator.transfer(&plan, &TerminalConfirm).await?
            };

            print!("{}", report);
            if !report.is_complete() {
                anyhow::bail!(
                    "{} series failed, {} dataset files not written",
                    report.failed().count(),
                    report.problems.len()
                );
            }
        }
        Commands::Describe {
            dataset,
            name,
            bids_version,
            license,
            authors,
            acknowledgements,
            how_to_acknowledge,
            funding,
            references,
            doi,
        } => {
            let mut tree = DatasetTree::new(&dataset).await?;
            let default_name = config.dataset_name_for(&dataset);
            tree.ensure_description(&default_name, &config.bids_version).await?;

            let update = DescriptionUpdate {
                name,
                bids_version,
                license,
                authors: non_empty(authors),
                acknowledgements,
                how_to_acknowledge,
                funding: non_empty(funding),
                references_and_links: non_empty(references),
                dataset_doi: doi,
            };
            let description = tree.update_description(update).await?;
            println!("{}", serde_json::to_string_pretty(&description)?);
        }
        Commands::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            std::fs::write(&path, ConfigTable::template())
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn read_plan(path: &Path) -> Result<SubjectPlan> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(SubjectPlan::from_json(&text)?)
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

fn split_override(text: &str) -> Result<(SeriesIndex, &str)> {
    let (index, value) = text
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Expected INDEX=VALUE, got {:?}", text))?;
    let index: usize = index
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid series index in {:?}", text))?;
    Ok((SeriesIndex(index), value.trim()))
}

fn apply_overrides(
    plan: &mut SubjectPlan,
    tasks: &[String],
    runs: &[String],
    references: &[String],
) -> Result<()> {
    for item in tasks {
        let (index, task) = split_override(item)?;
        plan.get_mut(index)?.classification.task = task.to_string();
    }
    for item in runs {
        let (index, run) = split_override(item)?;
        let run: u32 = run
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid run number in {:?}", item))?;
        plan.get_mut(index)?.classification.run = Some(run);
    }
    for item in references {
        let (index, span) = split_override(item)?;
        let span: ReferenceSpan = span.parse()?;
        let series = plan.get_mut(index)?;
        series.classification.reference_span = Some(span);
        series.classification.heuristic_reference = false;
    }
    Ok(())
}

fn print_plan(plan: &SubjectPlan) {
    eprintln!("{} from {}", plan.subject, plan.source.display());
    for s in &plan.series {
        let c = &s.classification;
        eprintln!(
            "  [{}] {:<32} {:>4} vols  {:<8} {:<6} {:<10} {}{}{}{}",
            s.index,
            s.description,
            s.volume_count,
            s.acquired_at
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            c.category,
            c.label,
            if s.transfer { "transfer" } else { "skip" },
            if c.excluded { " excluded" } else { "" },
            if s.diffusion_weighted { " diffusion-tags" } else { "" },
            c.reference_span
                .as_ref()
                .map(|span| format!(" ref {}", span))
                .unwrap_or_default(),
        );
    }
}
