use super::{ReportLine, long_date, month_range, parse_report};
use crate::error::ReportError;
use crate::types::Report;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;
use time::{Date, Duration};

const TITLE_PREFIX: &str = "Major Council Agenda Items, Tentative for";
const TENTATIVE_NOTE: &str = "Note: This is a Tentative Agenda Listing. Dates of items are subject to change up to the last minute for a variety of reasons. In addition, this listing does not necessarily report all items, just ones that are noteworthy. The City Manager typically reviews the tentative agenda items list in more detail with each Councilmember during individual meetings.";
const PLACEHOLDER: &str = "[Placeholder for user to manually enter items.]";
const RULE: &str = "---";
const COMPLETED_LOOKBACK_DAYS: i64 = 60;

/// The styled agenda summary, laid out as Markdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDocument {
    pub updated: Date,
    pub month_range: String,
    pub lines: Vec<ReportLine>,
}

impl ReportDocument {
    pub fn new(report: &Report, today: Date) -> Self {
        Self {
            updated: today,
            month_range: month_range(&report.dates, today),
            lines: parse_report(&report.text),
        }
    }

    pub fn title(&self) -> String {
        format!("{TITLE_PREFIX} {}", self.month_range)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out);
        let _ = writeln!(out, "Updated {}\n", long_date(self.updated));
        let _ = writeln!(out, "**{}**\n", self.title());
        let _ = writeln!(out, "*{TENTATIVE_NOTE}*\n");
        let _ = writeln!(out, "{RULE}\n");

        let mut first_date = true;
        let mut in_list = false;
        for line in &self.lines {
            match line {
                ReportLine::DateHeader(text) => {
                    if in_list {
                        out.push('\n');
                        in_list = false;
                    }
                    if !first_date {
                        let _ = writeln!(out, "{RULE}\n");
                    }
                    first_date = false;
                    let _ = writeln!(out, "**{text}**\n");
                }
                ReportLine::Section(_, text) => {
                    let _ = writeln!(out, "- {text}");
                    in_list = true;
                }
                ReportLine::Item(text) => {
                    let _ = writeln!(out, "    - {text}");
                    in_list = true;
                }
            }
        }
        if in_list {
            out.push('\n');
        }

        let since = self
            .updated
            .checked_sub(Duration::days(COMPLETED_LOOKBACK_DAYS))
            .unwrap_or(self.updated);
        let _ = writeln!(out, "{RULE}\n");
        let _ = writeln!(out, "**TBD:**\n");
        let _ = writeln!(out, "{PLACEHOLDER}\n");
        let _ = writeln!(out, "**Significant Items Completed Since {}:**\n", long_date(since));
        let _ = writeln!(out, "{PLACEHOLDER}");
        out
    }

    /// Write the rendered document, replacing `path` atomically.
    pub fn write_to(&self, path: &Path) -> Result<(), ReportError> {
        let parent = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| io::Error::other("report path has no file name"))?;
        let tmp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));
        fs::write(&tmp_path, self.render())?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
