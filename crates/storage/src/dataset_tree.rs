//! Filesystem dataset store.
//!
//! Writes the dataset-level files (`dataset_description.json`,
//! `participants.tsv`, `CHANGES`) at the root and the per-subject scans
//! index inside the subject (or session) folder. Single writer; nothing is
//! locked.

use crate::description::{DatasetDescription, DescriptionUpdate};
use crate::{DatasetStore, ParticipantUpdate, Result, StorageError, SubjectState};
use bidsconv_core::{PatientInfo, SubjectSpec};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const DESCRIPTION_FILE: &str = "dataset_description.json";
const PARTICIPANTS_FILE: &str = "participants.tsv";
const PARTICIPANTS_HEADER: &str = "participant_id\tage\tsex";
const CHANGES_FILE: &str = "CHANGES";
const INITIAL_VERSION: &str = "0.01";
const SCANS_HEADER: &str = "filename";

/// Dataset store backed by a directory.
pub struct DatasetTree {
    root: PathBuf,
}

impl DatasetTree {
    /// Open a dataset root, creating the directory when needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Scans index path relative to the root, e.g. `sub-003/sub-003_scans.tsv`.
    pub fn scans_path(subject: &SubjectSpec) -> PathBuf {
        subject.relative_dir().join(format!("{}_scans.tsv", subject.prefix()))
    }

    /// Next CHANGES version after the one on the first line of `existing`.
    ///
    /// `0.07` style tags count in hundredths; `1.0.0` style tags bump the
    /// last component.
    fn next_version(existing: &str) -> Result<String> {
        let first = existing.lines().next().unwrap_or_default();
        let token = first.split_whitespace().next().unwrap_or_default();
        let invalid = || StorageError::ChangesVersion(first.to_string());

        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() >= 3 {
            let mut numbers = parts
                .iter()
                .map(|p| p.parse::<u64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| invalid())?;
            if let Some(last) = numbers.last_mut() {
                *last += 1;
            }
            let numbers: Vec<String> = numbers.iter().map(|n| n.to_string()).collect();
            return Ok(numbers.join("."));
        }

        let current: f64 = token.parse().map_err(|_| invalid())?;
        if !current.is_finite() || current < 0.0 {
            return Err(invalid());
        }
        let hundredths = (current * 100.0).round() as u64 + 1;
        Ok(format!("{}.{:02}", hundredths / 100, hundredths % 100))
    }
}

#[async_trait::async_trait]
impl DatasetStore for DatasetTree {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn subject_state(&self, subject: &SubjectSpec) -> Result<SubjectState> {
        let dir = self.path(subject.subject_label());
        if !fs::try_exists(&dir).await? {
            return Ok(SubjectState::Absent);
        }

        let mut sessions = Vec::new();
        let mut rd = fs::read_dir(&dir).await?;
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("ses-") && entry.file_type().await?.is_dir() {
                sessions.push(name);
            }
        }
        sessions.sort();
        Ok(SubjectState::Present { sessions })
    }

    async fn remove_dir(&mut self, relative: &Path) -> Result<()> {
        let dir = self.path(relative);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Removed {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn install_file(&mut self, source: &Path, relative: &Path) -> Result<()> {
        let dest = self.path(relative);
        if fs::try_exists(&dest).await? {
            return Err(StorageError::Exists(dest));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        if fs::rename(source, &dest).await.is_err() {
            // Different filesystems: copy, then drop the source.
            fs::copy(source, &dest).await?;
            fs::remove_file(source).await?;
        }
        debug!("{} ---> {}", source.display(), dest.display());
        Ok(())
    }

    async fn load_description(&self) -> Result<Option<DatasetDescription>> {
        read_json(&self.path(DESCRIPTION_FILE)).await
    }

    async fn ensure_description(&mut self, name: &str, bids_version: &str) -> Result<bool> {
        let path = self.path(DESCRIPTION_FILE);
        if fs::try_exists(&path).await? {
            return Ok(false);
        }
        let description = DatasetDescription::new(name, bids_version);
        write_json(&path, &description).await?;
        info!("Created {}", path.display());
        Ok(true)
    }

    async fn update_description(&mut self, update: DescriptionUpdate) -> Result<DatasetDescription> {
        let path = self.path(DESCRIPTION_FILE);
        let mut description: DatasetDescription = read_json(&path)
            .await?
            .ok_or_else(|| StorageError::NotFound(path.clone()))?;
        description.apply(update)?;
        write_json(&path, &description).await?;
        Ok(description)
    }

    async fn has_participant(&self, participant_id: &str) -> Result<bool> {
        let text = read_text(&self.path(PARTICIPANTS_FILE)).await?.unwrap_or_default();
        Ok(text
            .lines()
            .skip(1)
            .any(|line| line.split('\t').next() == Some(participant_id)))
    }

    async fn upsert_participant(
        &mut self,
        participant_id: &str,
        info: &PatientInfo,
        replace: bool,
    ) -> Result<ParticipantUpdate> {
        let path = self.path(PARTICIPANTS_FILE);
        let row = format!(
            "{}\t{}\t{}",
            participant_id,
            info.age.map(|a| a.to_string()).unwrap_or_default(),
            info.sex.clone().unwrap_or_default()
        );

        let existing = read_text(&path).await?;
        let mut lines: Vec<String> = match &existing {
            Some(text) => text.lines().map(|l| l.to_string()).collect(),
            None => vec![PARTICIPANTS_HEADER.to_string()],
        };
        if lines.is_empty() {
            lines.push(PARTICIPANTS_HEADER.to_string());
        }

        let is_row = |line: &String| line.split('\t').next() == Some(participant_id);
        let outcome = if lines.iter().skip(1).any(is_row) {
            if !replace {
                debug!("Keeping participants row for {}", participant_id);
                return Ok(ParticipantUpdate::Kept);
            }
            let header = lines.remove(0);
            lines.retain(|l| !is_row(l));
            lines.insert(0, header);
            ParticipantUpdate::Replaced
        } else {
            ParticipantUpdate::Added
        };

        lines.push(row);
        fs::write(&path, format!("{}\n", lines.join("\n"))).await?;
        info!("{:?} participants row for {}", outcome, participant_id);
        Ok(outcome)
    }

    async fn append_scans(&mut self, subject: &SubjectSpec, rows: &[String]) -> Result<PathBuf> {
        let relative = Self::scans_path(subject);
        let path = self.path(&relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut text = read_text(&path)
            .await?
            .unwrap_or_else(|| format!("{}\n", SCANS_HEADER));
        if !text.ends_with('\n') {
            text.push('\n');
        }
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        fs::write(&path, text).await?;
        Ok(relative)
    }

    async fn next_changes_version(&self) -> Result<String> {
        match read_text(&self.path(CHANGES_FILE)).await? {
            Some(text) if !text.trim().is_empty() => Self::next_version(&text),
            _ => Self::next_version(INITIAL_VERSION),
        }
    }

    async fn prepend_changes(&mut self, entries: &[String], at: NaiveDateTime) -> Result<String> {
        let path = self.path(CHANGES_FILE);
        let stamp = at.format("%Y-%m-%dT%H:%M:%S");

        let existing = match read_text(&path).await? {
            Some(text) if !text.trim().is_empty() => text,
            _ => format!("{} {}\n\n\t- Initial release.\n\n", INITIAL_VERSION, stamp),
        };
        let version = Self::next_version(&existing)?;

        let mut block = format!("{} {}\n\n", version, stamp);
        for entry in entries {
            block.push_str(entry);
            if !entry.ends_with('\n') {
                block.push('\n');
            }
        }
        block.push_str("\n\n");
        block.push_str(&existing);

        fs::write(&path, block).await?;
        info!("CHANGES updated to version {}", version);
        Ok(version)
    }

    async fn has_readme(&self) -> bool {
        for name in ["README", "README.md", "README.txt", "README.rst"] {
            if fs::try_exists(self.path(name)).await.unwrap_or(false) {
                return true;
            }
        }
        false
    }

    async fn update_sidecar(
        &mut self,
        relative: &Path,
        set: serde_json::Map<String, serde_json::Value>,
        remove: &[&str],
    ) -> Result<()> {
        let path = self.path(relative);
        let value: serde_json::Value = read_json(&path)
            .await?
            .ok_or_else(|| StorageError::NotFound(path.clone()))?;
        let serde_json::Value::Object(mut map) = value else {
            return Err(StorageError::NotAnObject(path));
        };

        for key in remove {
            map.remove(*key);
        }
        for (key, value) in set {
            map.insert(key, value);
        }

        write_json(&path, &map).await
    }
}

async fn read_text(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match read_text(path).await? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

/// Pretty JSON with four-space indentation.
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    buf.push(b'\n');
    fs::write(path, buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(hour: u32) -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 5, 17)
            .and_then(|d| d.and_hms_opt(hour, 30, 0))
            .unwrap()
    }

    #[tokio::test]
    async fn test_changes_initial_and_bump() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = DatasetTree::new(dir.path()).await.unwrap();

        let v1 = tree
            .prepend_changes(&["\t- ADD sub-003 to the BIDS directory".into()], at(9))
            .await
            .unwrap();
        assert_eq!(v1, "0.02");

        let v2 = tree.prepend_changes(&["\t- ADD sub-004".into()], at(10)).await.unwrap();
        assert_eq!(v2, "0.03");

        let text = std::fs::read_to_string(dir.path().join("CHANGES")).unwrap();
        assert!(text.starts_with("0.03 2024-05-17T10:30:00\n\n\t- ADD sub-004\n"));
        assert!(text.contains("0.02 2024-05-17T09:30:00"));
        assert!(text.trim_end().ends_with("\t- Initial release."));
    }

    #[tokio::test]
    async fn test_changes_version_rollover() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("CHANGES"), "0.99 2020-01-01T00:00:00\n\n").unwrap();
        let mut tree = DatasetTree::new(dir.path()).await.unwrap();

        assert_eq!(tree.prepend_changes(&[], at(1)).await.unwrap(), "1.00");
    }

    #[tokio::test]
    async fn test_changes_three_part_version() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("CHANGES"),
            "1.0.9 2019-01-01\n\n\t- Initial release.\n",
        )
        .unwrap();
        let mut tree = DatasetTree::new(dir.path()).await.unwrap();

        assert_eq!(tree.next_changes_version().await.unwrap(), "1.0.10");
        assert_eq!(tree.prepend_changes(&[], at(1)).await.unwrap(), "1.0.10");
        let text = std::fs::read_to_string(dir.path().join("CHANGES")).unwrap();
        assert!(text.starts_with("1.0.10 2024-05-17T01:30:00\n"));
        assert!(text.contains("1.0.9 2019-01-01"));
    }

    #[tokio::test]
    async fn test_next_changes_version_reads_only() {
        let dir = tempfile::tempdir().unwrap();
        let tree = DatasetTree::new(dir.path()).await.unwrap();

        assert_eq!(tree.next_changes_version().await.unwrap(), "0.02");
        assert!(!dir.path().join("CHANGES").exists());

        std::fs::write(dir.path().join("CHANGES"), "1.x.0 2019-01-01\n").unwrap();
        let err = tree.next_changes_version().await.unwrap_err();
        assert!(matches!(err, StorageError::ChangesVersion(_)));
    }

    #[tokio::test]
    async fn test_changes_bad_version() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("CHANGES"), "Initial notes\n").unwrap();
        let mut tree = DatasetTree::new(dir.path()).await.unwrap();

        let err = tree.prepend_changes(&[], at(1)).await.unwrap_err();
        assert!(matches!(err, StorageError::ChangesVersion(_)));
    }

    #[tokio::test]
    async fn test_participants_add_keep_replace() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = DatasetTree::new(dir.path()).await.unwrap();
        let first = PatientInfo { age: Some(30), sex: Some("F".into()) };
        let second = PatientInfo { age: Some(31), sex: None };

        assert_eq!(
            tree.upsert_participant("sub-003", &first, false).await.unwrap(),
            ParticipantUpdate::Added
        );
        assert!(tree.has_participant("sub-003").await.unwrap());
        assert_eq!(
            tree.upsert_participant("sub-003", &second, false).await.unwrap(),
            ParticipantUpdate::Kept
        );
        tree.upsert_participant("sub-004", &PatientInfo::default(), false).await.unwrap();
        assert_eq!(
            tree.upsert_participant("sub-003", &second, true).await.unwrap(),
            ParticipantUpdate::Replaced
        );

        let text = std::fs::read_to_string(dir.path().join("participants.tsv")).unwrap();
        assert_eq!(text, "participant_id\tage\tsex\nsub-004\t\t\nsub-003\t31\t\n");
    }

    #[tokio::test]
    async fn test_scans_index_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = DatasetTree::new(dir.path()).await.unwrap();
        let subject = SubjectSpec::new(3).with_session("1");

        tree.append_scans(&subject, &["anat/sub-003_ses-1_T1w.nii.gz".into()]).await.unwrap();
        let rel = tree
            .append_scans(&subject, &["func/sub-003_ses-1_task-rest_bold.nii.gz".into()])
            .await
            .unwrap();

        assert_eq!(rel, PathBuf::from("sub-003/ses-1/sub-003_ses-1_scans.tsv"));
        let text = std::fs::read_to_string(dir.path().join(rel)).unwrap();
        assert_eq!(
            text,
            "filename\nanat/sub-003_ses-1_T1w.nii.gz\nfunc/sub-003_ses-1_task-rest_bold.nii.gz\n"
        );
    }

    #[tokio::test]
    async fn test_sidecar_update_preserves_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = DatasetTree::new(dir.path()).await.unwrap();
        let rel = Path::new("sub-001/fmap/sub-001_phasediff.json");
        std::fs::create_dir_all(dir.path().join("sub-001/fmap")).unwrap();
        std::fs::write(
            dir.path().join(rel),
            r#"{"EchoTime": 0.00738, "RepetitionTime": 0.5}"#,
        )
        .unwrap();

        let mut set = serde_json::Map::new();
        set.insert("EchoTime1".into(), json!(0.00492));
        set.insert("EchoTime2".into(), json!(0.00738));
        tree.update_sidecar(rel, set, &["EchoTime"]).await.unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(rel)).unwrap()).unwrap();
        assert_eq!(value["RepetitionTime"], json!(0.5));
        assert_eq!(value["EchoTime1"], json!(0.00492));
        assert!(value.get("EchoTime").is_none());
    }

    #[tokio::test]
    async fn test_description_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = DatasetTree::new(dir.path()).await.unwrap();

        assert!(tree.ensure_description("study", "1.1.0").await.unwrap());
        assert!(!tree.ensure_description("other", "1.1.0").await.unwrap());

        let d = tree.load_description().await.unwrap().unwrap();
        assert_eq!(d.name, "study");

        let updated = tree
            .update_description(DescriptionUpdate {
                dataset_doi: Some("10.0/abc".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.extra["DatasetDOI"], "10.0/abc");
    }

    #[tokio::test]
    async fn test_subject_state_lists_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let tree = DatasetTree::new(dir.path()).await.unwrap();
        let subject = SubjectSpec::new(5);

        assert_eq!(tree.subject_state(&subject).await.unwrap(), SubjectState::Absent);

        std::fs::create_dir_all(dir.path().join("sub-005/ses-2")).unwrap();
        std::fs::create_dir_all(dir.path().join("sub-005/ses-1")).unwrap();
        std::fs::create_dir_all(dir.path().join("sub-005/anat")).unwrap();
        assert_eq!(
            tree.subject_state(&subject).await.unwrap(),
            SubjectState::Present { sessions: vec!["ses-1".into(), "ses-2".into()] }
        );
    }

    #[tokio::test]
    async fn test_install_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = DatasetTree::new(dir.path().join("bids")).await.unwrap();
        let src = dir.path().join("a.json");
        std::fs::write(&src, "{}").unwrap();

        tree.install_file(&src, Path::new("sub-001/anat/sub-001_T1w.json")).await.unwrap();
        assert!(!src.exists());

        std::fs::write(&src, "{}").unwrap();
        let err = tree
            .install_file(&src, Path::new("sub-001/anat/sub-001_T1w.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Exists(_)));
    }
}
