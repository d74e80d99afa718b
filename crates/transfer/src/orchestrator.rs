//! Converts and installs the selected series of a subject plan.
//!
//! ```text
//! naming check -> label confirmation -> CHANGES version -> guard -> tree check
//!   -> per series: stage -> convert -> install -> TaskName
//!   -> IntendedFor / EchoTimeN -> scans -> participants -> CHANGES
//! ```
//!
//! Nothing is written before every check has passed. After that, a failed
//! series is reported and the batch moves on; completed series stay. Index
//! files that cannot be written once series are installed end up in
//! [`TransferReport::problems`].

use crate::error::SeriesFailure;
use crate::guard::{guard, Confirm, GuardDecision};
use crate::pipeline::PipelineConfig;
use crate::plan::{PlannedSeries, SubjectPlan};
use crate::report::{SeriesOutcome, SeriesStatus, TransferReport};
use crate::{Result, TransferError};
use bidsconv_core::{
    Category, DestinationEntry, FieldmapRole, RunId, SeriesIndex, SubjectSpec, DIFFUSION_EXTS,
    PAYLOAD_EXT, PAYLOAD_EXT_PLAIN, SIDECAR_EXT,
};
use bidsconv_naming::{clean_task, echo_stem, NamingEngine, NamingPlan};
use bidsconv_storage::{DatasetStore, ParticipantUpdate, DEFAULT_BIDS_VERSION};
use bidsconv_tools::{ConvertInput, Converter};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Settings for the orchestrator.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// `BIDSVersion` of a new dataset description
    pub bids_version: String,

    /// `Name` of a new dataset description (None = root folder name)
    pub dataset_name: Option<String>,

    /// Where per-run work folders are created (None = system temp dir)
    pub work_dir: Option<PathBuf>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            bids_version: DEFAULT_BIDS_VERSION.to_string(),
            dataset_name: None,
            work_dir: None,
        }
    }
}

impl From<&PipelineConfig> for TransferConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            bids_version: config.bids_version.clone(),
            dataset_name: config.dataset_name.clone(),
            work_dir: None,
        }
    }
}

/// Drives conversion and installation into a dataset.
pub struct TransferOrchestrator<S: DatasetStore, C: Converter> {
    store: S,
    converter: C,
    config: TransferConfig,
}

impl<S: DatasetStore, C: Converter> TransferOrchestrator<S, C> {
    /// Create an orchestrator.
    pub fn new(store: S, converter: C) -> Self {
        Self {
            store,
            converter,
            config: TransferConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    /// The dataset store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Transfer the selected series of a plan.
    ///
    /// Returns an error only when the batch could not start. Per-series
    /// failures and index files that could not be written are in the
    /// report.
    pub async fn transfer(
        &mut self,
        plan: &SubjectPlan,
        confirm: &dyn Confirm,
    ) -> Result<TransferReport> {
        let subject = &plan.subject;
        let inputs = plan.naming_inputs();
        if inputs.is_empty() {
            return Err(TransferError::NothingSelected);
        }

        let naming = NamingEngine::new(subject.clone());
        let checked = naming.check(&inputs)?;

        if !checked.unknown_labels.is_empty() {
            let labels: Vec<String> = checked
                .unknown_labels
                .iter()
                .map(|l| format!("{} ({})", l.label, l.category))
                .collect();
            let question = format!("Unknown labels: {}. Transfer anyway?", labels.join(", "));
            if !confirm.confirm(&question) {
                return Err(TransferError::UnconfirmedLabels(checked.unknown_labels));
            }
        }

        let version = self.store.next_changes_version().await?;
        debug!("CHANGES will move to version {}", version);

        let decision = guard(&self.store, subject, confirm).await?;
        let names = match &decision {
            GuardDecision::Proceed => naming.check_against_tree(&inputs, self.store.root())?,
            GuardDecision::Replace(_) => checked,
        };

        let run_id = RunId::new();
        let span = info_span!("transfer", run = %run_id, subject = %subject);
        self.run(plan, names, decision, confirm, run_id)
            .instrument(span)
            .await
    }

    async fn run(
        &mut self,
        plan: &SubjectPlan,
        names: NamingPlan,
        decision: GuardDecision,
        confirm: &dyn Confirm,
        run_id: RunId,
    ) -> Result<TransferReport> {
        let subject = &plan.subject;
        let root = self.store.root().to_path_buf();
        let mut changes = Vec::new();

        let replaced = match decision {
            GuardDecision::Replace(dir) => {
                self.store.remove_dir(&dir).await?;
                changes.push(format!("\t- DELETED {}", root.join(&dir).display()));
                Some(dir)
            }
            GuardDecision::Proceed => None,
        };

        let name = self
            .config
            .dataset_name
            .clone()
            .unwrap_or_else(|| folder_name(&root));
        self.store
            .ensure_description(&name, &self.config.bids_version)
            .await?;

        let work = self
            .config
            .work_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("bidsconv-{}", run_id));
        fs::create_dir_all(&work).await?;

        let mut outcomes = Vec::new();
        for series in plan.selected() {
            let Some(entry) = names.entry(series.index) else {
                continue;
            };

            info!(
                "Converting series {} ({}) to {}",
                series.index,
                series.description,
                entry.folder.display()
            );
            let mut files = Vec::new();
            let mut warnings = Vec::new();
            let status = match self
                .transfer_series(
                    &work,
                    subject,
                    series,
                    entry,
                    &mut files,
                    &mut warnings,
                    &mut changes,
                )
                .await
            {
                Ok(()) => SeriesStatus::Transferred,
                Err(e) => {
                    error!("Series {} failed: {}", series.index, e);
                    changes.push(format!(
                        "\t- FAILED series {} ({}): {}",
                        series.index, series.description, e
                    ));
                    SeriesStatus::Failed { reason: e.to_string() }
                }
            };

            outcomes.push(SeriesOutcome {
                index: series.index,
                stem: entry.stem.clone(),
                status,
                files,
                warnings,
            });
        }

        if let Err(e) = fs::remove_dir_all(&work).await {
            warn!("Could not remove work folder {}: {}", work.display(), e);
        }

        self.annotate_fieldmaps(plan, &mut outcomes, &mut changes).await;

        let mut problems = Vec::new();
        let scans_file = match self.write_scans(subject, &outcomes).await {
            Ok(path) => path,
            Err(e) => {
                error!("Scans index not written: {}", e);
                problems.push(format!("scans index: {}", e));
                None
            }
        };

        let mut participant = None;
        if outcomes.iter().any(|o| o.is_transferred()) {
            let id = subject.subject_label();
            match self.write_participant(&id, plan, confirm).await {
                Ok(update) => {
                    changes.push(match update {
                        ParticipantUpdate::Added => format!("\t- Add {} to participants.tsv", id),
                        ParticipantUpdate::Replaced => {
                            format!("\t- Replace {} in participants.tsv", id)
                        }
                        ParticipantUpdate::Kept => {
                            format!("\t- Keep existing {} row in participants.tsv", id)
                        }
                    });
                    participant = Some(update);
                }
                Err(e) => {
                    error!("participants.tsv not written: {}", e);
                    problems.push(format!("participants.tsv: {}", e));
                }
            }
            changes.push(format!(
                "\t- ADD {} to the BIDS directory: {}",
                subject,
                root.display()
            ));
        }

        let mut changes_version = None;
        if !changes.is_empty() {
            let now = chrono::Local::now().naive_local();
            match self.store.prepend_changes(&changes, now).await {
                Ok(version) => changes_version = Some(version),
                Err(e) => {
                    error!("CHANGES not written: {}", e);
                    problems.push(format!("CHANGES: {}", e));
                }
            }
        }

        let follow_ups = self.follow_ups(plan, &outcomes).await;

        let report = TransferReport {
            run_id,
            subject: subject.clone(),
            replaced,
            series: outcomes,
            participant,
            changes_version,
            scans_file,
            problems,
            follow_ups,
        };
        info!(
            "Transferred {} of {} series",
            report.transferred().count(),
            report.series.len()
        );
        Ok(report)
    }

    async fn write_participant(
        &mut self,
        id: &str,
        plan: &SubjectPlan,
        confirm: &dyn Confirm,
    ) -> Result<ParticipantUpdate> {
        let replace = self.store.has_participant(id).await?
            && confirm.confirm(&format!(
                "participants.tsv already lists {}. Replace the row?",
                id
            ));
        Ok(self.store.upsert_participant(id, &plan.patient, replace).await?)
    }

    /// Stage, convert and install one series.
    #[allow(clippy::too_many_arguments)]
    async fn transfer_series(
        &mut self,
        work: &Path,
        subject: &SubjectSpec,
        series: &PlannedSeries,
        entry: &DestinationEntry,
        installed: &mut Vec<PathBuf>,
        warnings: &mut Vec<String>,
        changes: &mut Vec<String>,
    ) -> std::result::Result<(), SeriesFailure> {
        let dir = work.join(series.index.to_string());
        let raw = dir.join("raw");
        let out = dir.join("out");
        fs::create_dir_all(&raw).await?;
        fs::create_dir_all(&out).await?;

        // Prefixed with the position so equal names from different folders survive.
        for (n, file) in series.files.iter().enumerate() {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            fs::copy(file, raw.join(format!("{:05}_{}", n, name))).await?;
        }

        let input = ConvertInput {
            source_dir: raw,
            output_dir: out.clone(),
            stem: entry.stem.clone(),
        };
        changes.push(format!("\t- {}", self.converter.command_line(&input)));
        let output = self
            .converter
            .convert(&input)
            .await
            .map_err(SeriesFailure::Launch)?;
        debug!(
            "{} exited with {} after {:?}",
            self.converter.name(),
            output.exit_code,
            output.duration
        );
        if !output.is_success() {
            return Err(SeriesFailure::Exit {
                code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let bases = converter_outputs(&out).await?;
        let targets = output_stems(subject, series, entry, bases)?;

        for (base, stem) in targets {
            let mut files = Vec::new();

            let gz = out.join(format!("{}{}", base, PAYLOAD_EXT));
            let plain = out.join(format!("{}{}", base, PAYLOAD_EXT_PLAIN));
            if fs::try_exists(&gz).await? {
                files.push((gz, PAYLOAD_EXT));
            } else if fs::try_exists(&plain).await? {
                warn!("{} was not compressed by the converter", stem);
                warnings.push(format!(
                    "{}{} is not gzipped; compress it manually",
                    stem, PAYLOAD_EXT_PLAIN
                ));
                files.push((plain, PAYLOAD_EXT_PLAIN));
            } else {
                return Err(SeriesFailure::MissingPayload(base));
            }

            files.push((out.join(format!("{}{}", base, SIDECAR_EXT)), SIDECAR_EXT));

            if entry.category == Category::Diffusion {
                for ext in DIFFUSION_EXTS {
                    let path = out.join(format!("{}{}", base, ext));
                    if fs::try_exists(&path).await? {
                        files.push((path, *ext));
                    } else {
                        warnings.push(format!("converter wrote no {} for {}", ext, stem));
                    }
                }
            }

            for (source, ext) in files {
                let relative = entry.folder.join(format!("{}{}", stem, ext));
                self.store.install_file(&source, &relative).await?;
                changes.push(format!(
                    "\t- {} ---> {}",
                    source.display(),
                    self.store.root().join(&relative).display()
                ));
                installed.push(relative);
            }

            if entry.category == Category::Functional {
                let task = clean_task(&series.classification.task);
                let mut set = Map::new();
                set.insert("TaskName".to_string(), Value::String(task.clone()));
                let sidecar = entry.folder.join(format!("{}{}", stem, SIDECAR_EXT));
                self.store.update_sidecar(&sidecar, set, &[]).await?;
                changes.push(format!(
                    "\t- Add TaskName {} to {}",
                    task,
                    slash_path(&sidecar)
                ));
            }
        }

        Ok(())
    }

    /// Write `IntendedFor` and echo times into fieldmap sidecars.
    async fn annotate_fieldmaps(
        &mut self,
        plan: &SubjectPlan,
        outcomes: &mut [SeriesOutcome],
        changes: &mut Vec<String>,
    ) {
        let subject = &plan.subject;
        let payloads: HashMap<SeriesIndex, Vec<String>> = outcomes
            .iter()
            .filter(|o| o.is_transferred())
            .map(|o| {
                let paths = o
                    .files
                    .iter()
                    .filter(|f| is_payload(f))
                    .filter_map(|f| f.strip_prefix(subject.subject_label()).ok())
                    .map(slash_path)
                    .collect();
                (o.index, paths)
            })
            .collect();

        for outcome in outcomes.iter_mut().filter(|o| o.is_transferred()) {
            let Some(series) = plan.get(outcome.index) else {
                continue;
            };
            let c = &series.classification;
            if c.category != Category::Fieldmap {
                continue;
            }

            let mut set = Map::new();
            let intended: Vec<String> = c
                .resolved_reference()
                .map(|span| span.indices_below(plan.series.len()))
                .unwrap_or_default()
                .into_iter()
                .filter_map(|i| payloads.get(&SeriesIndex(i)))
                .flatten()
                .cloned()
                .collect();
            match intended.as_slice() {
                [] => outcome
                    .warnings
                    .push("no transferred series to reference in IntendedFor".to_string()),
                [single] => {
                    set.insert("IntendedFor".to_string(), Value::String(single.clone()));
                }
                _ => {
                    set.insert("IntendedFor".to_string(), Value::from(intended));
                }
            }

            let mut remove: Vec<&str> = Vec::new();
            if c.fieldmap_role == Some(FieldmapRole::PhaseDiff) {
                let previous = series.index.previous().and_then(|i| plan.get(i));
                if let Some(previous) = previous.filter(|p| {
                    p.classification.category == Category::Fieldmap && p.echo_times.len() > 1
                }) {
                    debug!("Series {}: echo times from series {}", series.index, previous.index);
                    for (n, echo) in previous.echo_times.iter().enumerate() {
                        set.insert(format!("EchoTime{}", n + 1), Value::from(echo / 1000.0));
                    }
                    remove.push("EchoTime");
                }
            }

            if set.is_empty() {
                continue;
            }
            let sidecars: Vec<PathBuf> = outcome
                .files
                .iter()
                .filter(|f| f.to_string_lossy().ends_with(SIDECAR_EXT))
                .cloned()
                .collect();
            let echo_keys: Vec<&str> = set
                .keys()
                .filter(|k| k.starts_with("EchoTime"))
                .map(|k| k.as_str())
                .collect();
            for sidecar in &sidecars {
                let name = slash_path(sidecar);
                match self.store.update_sidecar(sidecar, set.clone(), &remove).await {
                    Ok(()) => {
                        if let Some(intended) = set.get("IntendedFor") {
                            changes.push(format!("\t- Add IntendedFor {} to {}", intended, name));
                        }
                        if !echo_keys.is_empty() {
                            changes.push(format!(
                                "\t- Add echo times {} to {}",
                                echo_keys.join(", "),
                                name
                            ));
                        }
                    }
                    Err(e) => {
                        error!("Series {}: {}", outcome.index, e);
                        changes.push(format!("\t- FAILED to update {}: {}", name, e));
                        outcome.status = SeriesStatus::Failed {
                            reason: format!("sidecar update failed: {}", e),
                        };
                    }
                }
            }
        }
    }

    /// Append installed payloads to the scans index.
    async fn write_scans(
        &mut self,
        subject: &SubjectSpec,
        outcomes: &[SeriesOutcome],
    ) -> Result<Option<PathBuf>> {
        let base = subject.relative_dir();
        let rows: Vec<String> = outcomes
            .iter()
            .flat_map(|o| o.files.iter())
            .filter(|f| is_payload(f))
            .filter_map(|f| f.strip_prefix(&base).ok())
            .map(slash_path)
            .collect();

        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.store.append_scans(subject, &rows).await?))
    }

    async fn follow_ups(&self, plan: &SubjectPlan, outcomes: &[SeriesOutcome]) -> Vec<String> {
        let mut items = Vec::new();

        for outcome in outcomes.iter().filter(|o| o.is_transferred()) {
            let Some(series) = plan.get(outcome.index) else {
                continue;
            };
            let c = &series.classification;
            if c.category == Category::Functional {
                for payload in outcome.files.iter().filter(|f| is_payload(f)) {
                    let path = slash_path(payload);
                    if path.contains("task-rest") {
                        continue;
                    }
                    if let Some(events) = events_file(&path) {
                        items.push(format!("{} needs an events file: {}", path, events));
                    }
                }
            }
            if c.category == Category::Fieldmap && c.heuristic_reference {
                if let Some(span) = &c.reference_span {
                    items.push(format!(
                        "Series {} IntendedFor was inferred from series {}; check it",
                        series.index, span
                    ));
                }
            }
        }

        let root = self.store.root().display().to_string();
        if !self.store.has_readme().await {
            items.push(format!("Add a README to {}", root));
        }
        items.push(format!("Run the BIDS validator on {}", root));
        items
    }
}

/// Sidecar stems written by the converter, sorted.
async fn converter_outputs(out: &Path) -> std::io::Result<Vec<String>> {
    let mut bases = Vec::new();
    let mut rd = fs::read_dir(out).await?;
    while let Some(entry) = rd.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(base) = name.strip_suffix(SIDECAR_EXT) {
            bases.push(base.to_string());
        }
    }
    bases.sort();
    Ok(bases)
}

/// Pair every converter output with its destination stem.
///
/// One output keeps the planned stem whatever suffix the converter added.
/// Several outputs need distinct echo markers and are numbered by marker
/// order.
fn output_stems(
    subject: &SubjectSpec,
    series: &PlannedSeries,
    entry: &DestinationEntry,
    bases: Vec<String>,
) -> std::result::Result<Vec<(String, String)>, SeriesFailure> {
    match bases.len() {
        0 => Err(SeriesFailure::NoOutput),
        1 => Ok(bases
            .into_iter()
            .map(|base| (base, entry.stem.clone()))
            .collect()),
        _ => {
            let mut marked = Vec::new();
            for base in &bases {
                let suffix = base.strip_prefix(&entry.stem).unwrap_or(base);
                match echo_marker(suffix) {
                    Some(echo) => marked.push((echo, base.clone())),
                    None => return Err(SeriesFailure::UnexpectedOutput(bases)),
                }
            }
            marked.sort();
            if marked.windows(2).any(|w| w[0].0 == w[1].0) {
                return Err(SeriesFailure::UnexpectedOutput(bases));
            }

            debug!("Series {}: {} echoes", series.index, marked.len());
            Ok(marked
                .into_iter()
                .enumerate()
                .map(|(n, (_, base))| {
                    let stem = echo_stem(subject, &series.classification, n as u32 + 1);
                    (base, stem)
                })
                .collect())
        }
    }
}

/// Echo number the converter appended, e.g. `_e2` or `_e2_ph`.
fn echo_marker(suffix: &str) -> Option<u32> {
    let re = Regex::new(r"_e(\d+)(?:_|$)").ok()?;
    re.captures(suffix)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn is_payload(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(PAYLOAD_EXT) || name.ends_with(PAYLOAD_EXT_PLAIN)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// `func/sub-001_task-x_bold.nii.gz` -> `func/sub-001_task-x_events.tsv`
fn events_file(payload: &str) -> Option<String> {
    let (prefix, _) = payload.rsplit_once('_')?;
    Some(format!("{}_events.tsv", prefix))
}

fn folder_name(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "dataset".to_string())
}
