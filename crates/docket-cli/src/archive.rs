use crate::config::ConfigPaths;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

const METADATA_FILE: &str = "metadata.toml";
const REPORT_TEXT_FILE: &str = "report.txt";
const REPORT_DOCUMENT_FILE: &str = "report.md";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive io error: {0}")]
    Io(#[from] io::Error),
    #[error("archive metadata error: {0}")]
    Metadata(#[from] toml::ser::Error),
    #[error("archive time error: {0}")]
    Time(#[from] time::error::Format),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub id: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub finalized: bool,
    pub source: String,
    pub dates: Vec<String>,
    pub provider: String,
    pub model: String,
    pub export_path: Option<String>,
}

impl RunMetadata {
    pub fn new(
        source: &Path,
        dates: Vec<String>,
        provider: String,
        model: String,
    ) -> Result<Self, ArchiveError> {
        Ok(Self {
            id: Uuid::now_v7().to_string(),
            started_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
            finished_at: None,
            finalized: false,
            source: source.display().to_string(),
            dates,
            provider,
            model,
            export_path: None,
        })
    }
}

/// One run's directory under `~/.docket/reports/<id>/`.
#[derive(Debug)]
pub struct RunArchive {
    dir: PathBuf,
    metadata: RunMetadata,
}

impl RunArchive {
    pub fn start(paths: &ConfigPaths, metadata: RunMetadata) -> Result<Self, ArchiveError> {
        let dir = paths.reports_dir.join(&metadata.id);
        fs::create_dir_all(&dir)?;
        let archive = Self { dir, metadata };
        archive.write_metadata()?;
        Ok(archive)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store the raw report text and rendered document, then mark the run finalized.
    pub fn finalize(
        &mut self,
        report_text: &str,
        document: &str,
        export_path: Option<&Path>,
    ) -> Result<(), ArchiveError> {
        write_atomic(&self.dir.join(REPORT_TEXT_FILE), report_text.as_bytes())?;
        write_atomic(&self.dir.join(REPORT_DOCUMENT_FILE), document.as_bytes())?;
        self.metadata.finished_at = Some(OffsetDateTime::now_utc().format(&Rfc3339)?);
        self.metadata.finalized = true;
        self.metadata.export_path = export_path.map(|path| path.display().to_string());
        self.write_metadata()
    }

    fn write_metadata(&self) -> Result<(), ArchiveError> {
        let contents = toml::to_string_pretty(&self.metadata)?;
        write_atomic(&self.dir.join(METADATA_FILE), contents.as_bytes())
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ArchiveError> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other("archive path missing parent directory"))?;
    let tmp_path = parent.join(".tmp-write");
    fs::write(&tmp_path, contents)?;
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{RunArchive, RunMetadata};
    use crate::config::ConfigPaths;
    use std::fs;
    use std::path::Path;

    #[test]
    fn start_writes_pending_metadata() {
        let temp = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::from_base(temp.path().to_path_buf());
        let metadata = RunMetadata::new(
            Path::new("agenda.csv"),
            vec!["25-Aug".into()],
            "ollama".into(),
            "qwen3:30b-a3b".into(),
        )
        .unwrap();
        let archive = RunArchive::start(&paths, metadata).unwrap();

        assert!(archive.dir().starts_with(&paths.reports_dir));
        let content = fs::read_to_string(archive.dir().join("metadata.toml")).unwrap();
        assert!(content.contains("finalized = false"));
        assert!(content.contains("source = \"agenda.csv\""));
        assert!(!archive.dir().join("report.txt").exists());
    }

    #[test]
    fn finalize_stores_report_and_marks_done() {
        let temp = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::from_base(temp.path().to_path_buf());
        let metadata =
            RunMetadata::new(Path::new("agenda.csv"), Vec::new(), "openai".into(), "m".into())
                .unwrap();
        let mut archive = RunArchive::start(&paths, metadata).unwrap();

        archive
            .finalize("August 25:\n", "# doc\n", Some(Path::new("/tmp/out.md")))
            .unwrap();

        assert_eq!(
            fs::read_to_string(archive.dir().join("report.txt")).unwrap(),
            "August 25:\n"
        );
        assert_eq!(fs::read_to_string(archive.dir().join("report.md")).unwrap(), "# doc\n");
        let content = fs::read_to_string(archive.dir().join("metadata.toml")).unwrap();
        assert!(content.contains("finalized = true"));
        assert!(content.contains("finished_at = "));
        assert!(content.contains("export_path = \"/tmp/out.md\""));
        assert!(!archive.dir().join(".tmp-write").exists());
    }
}
