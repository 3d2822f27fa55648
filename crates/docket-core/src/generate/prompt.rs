use crate::error::PromptError;
use crate::types::AgendaRow;
use regex::Regex;
use std::sync::OnceLock;

pub const MEETING_DATE_SLOT: &str = "meeting_date";
pub const ITEMS_TEXT_SLOT: &str = "items_text";

/// Appended to the formatting prompt so reasoning models skip their thinking block.
pub const NO_THINK_DIRECTIVE: &str = " /no_think";

const MISSING_TITLE: &str = "unnamed item";
const MISSING_SECTION: &str = "placeholder";

pub const SUMMARIZE_TEMPLATE: &str = r#"You are an expert city clerk. Your task is to summarize each agenda item into ONE short clause.

THINK STEP BY STEP, ONCE PER ITEM AND NO MORE. WHEN EVERY ITEM IS DONE, EXIT YOUR THINKING BLOCK IMMEDIATELY AND OUTPUT THE SUMMARIZED LINES.
Rules for summarization:
- Summarize each agenda item in ONE concise clause, as short and clean as possible, that clearly signals what the item is. Most parenthesized text from the input can be omitted. Split or shorten further if it reads like a run-on sentence.
- First decide which category each item belongs in and prepend it to the item: "Study Session:" or "Closed Session:" or "Special Presentations:" or "Consent:" or "Consideration or Public Hearing:". IMPORTANT: ALL considerations OR public hearings go under "Consideration or Public Hearing:".
- Omit internal workflow wording such as "moved from [dates]" and "per [person]". DO NOT write "moved from 1/1 to 12/31 per Y.Carter" or "per K.Woodhouse".
- If an item contains the TEXT "placeholder" SPECIFICALLY (NOT "TBD" or similar), delete the placeholder wording and append "(placeholder)" to the end.
- If an item contains " ADD DESCRIPTION", delete it and append " - ADD DESCRIPTION" to the end, after any "(placeholder)".
- Each summary MUST use Title Case (capitalize all principal words), for example: "Approval of Minutes for 1/1/2025 Meeting".
- Delete workflow dates. Logistic dates that belong to the item stay exactly as written; do not convert month names or add/remove leading zeros.
- Long items may be split into separate items when they read better as concise separate items.

Good examples:
<examples>
Study Session: Study Session on Revenue Generation - ADD DESCRIPTION
Closed Session: TBD - ADD DESCRIPTION
Special Presentations: City Staff New Hires (Semi-Annual Update)
Consent: Annual POs/Agreements over $75K PWD-Wastewater
Consent: Police Militarized Equipment Annual Update - ADD DESCRIPTION (placeholder)
Consent: Sewer service charges for FY2025-26 (last year of approved 5-year schedule)
Consent: Approval of Minutes for 1/1/2024 City Council Meeting
Consideration or Public Hearing: Resolution to Establish Climate Action & Resilience Plan Implementation Committee per CAAP Task Force Charter
Consideration or Public Hearing: Continued Consideration of Climate Action and Resilience Plan Adoption
</examples>

Meeting Date: {meeting_date} - IMPORTANT! THIS IS THE ACTUAL MEETING DATE. Start the output with this meeting date written as <Month Day>, like "Meeting Date: January 1" or "Meeting Date: December 31". Parse carefully: "8-Sep" = "Meeting Date: September 8"!

Agenda items to summarize. ONLY SUMMARIZE THESE, NEVER COPY ITEMS FROM THE EXAMPLES:
<summarize_these>
{items_text}
</summarize_these>

Provide ONLY the meeting date line and then the summarized lines, each carefully capitalized and prefixed with its category, one per line: /think"#;

pub const FORMAT_TEMPLATE: &str = r#"You are an expert city clerk responsible for creating agenda summaries for the City Council. Your task is to take a list of agenda items for one meeting date and format them into a clear, concise report.

You have received a set of summarized items. Categorize them, make small edits where needed (capitalization, merging duplicates) and assemble them into a report.
Follow these rules strictly:
1.  Format: The output must be raw text only. Do not use any markdown like '##' or '**'.
2.  Date Header: The report must start with the FULL month name followed by the day number, e.g. "January 1:". NEVER use numeric-month abbreviations such as "1-Jan". Meeting-level notes go in parentheses immediately after the date.
3.  Sections: The report MUST CONTAIN each of these headers ON THEIR OWN LINE, in this order:
        "Study Session:"
        "Closed Session:"
        "Special Presentations:"
        "Consent:"
        "Consideration or Public Hearing:"
    If a section has no items, write "TBD" right after the section name, e.g. "Study Session: TBD" or "Consent: TBD".
4.  Item Bullet Points:
    - CRITICAL: Each agenda item MUST be on its own line.
    - Every item line starts with a single hyphen and a space: "- ". Never start a line with other bullet characters such as '•'.

Examples of the desired output format:
<examples>
Example 1 (full mix, including a populated Study Session)
September 10:
Study Session:
- Joint Study Session on Revenue Options - ADD DESCRIPTION
Closed Session: TBD
Special Presentations: TBD
Consent:
- Bi-Weekly Disbursements Approval
- Approval of Minutes for 1/1/2025 City Council Meeting
Consideration or Public Hearing:
- FY 2025-26 Budget Adoption
- Introduction of Ordinance Changing Council Meeting Start Time

Example 2 (sections that are entirely TBD and an item needing a description)
July 14:
Study Session: TBD
Closed Session: TBD
Special Presentations:
- Joann Arnos, OSPAC Years of Service
Consent:
- Annual POs/Agreements over $75K PWD-Wastewater
- Sewer Service Charges for FY 2025-26 (last year of approved 5-year schedule)
- Resolution for Park Naming - ADD DESCRIPTION
Consideration or Public Hearing: TBD

NEGATIVE example (what NOT to do: bad bullet characters, numeric date, long descriptions, misplaced headers):
25-Aug:
Closed Session: CLOSED SESSION - TBD • ADD DESCRIPTION - per K.Woodhouse 6/3
Special Presentations:
- City Staff New Hires (Semi-Annual Update) (placeholder) - moved from 6/23 to 8/25 per Y.Carter; HR to provide List of New Hires to K.Woodhouse for review
- Proclamation - National Preparedness Month - September 2025 (placeholder) - ADD DESCRIPTION
Public Hearing: Housing Element Rezoning EIR Certification + Ordinance Introduction (possibly continued from 8/11)
Study Session on Revenue Generation (Title TBD from K. Woodhouse) • ADD DESCRIPTION - per K.Woodhouse 6/3
</examples>

Using the examples, the negative example and the items below, generate the report for this meeting date. List each item under the CORRECT category and format the whole agenda CAREFULLY!

Meeting Date: {meeting_date} - IMPORTANT: THIS IS THE ACTUAL MEETING DATE FOR YOUR REPORT! Parse carefully: "8-Sep" = "September 8"!

Agenda Items:
<items_to_sort>
{items_text}
</items_to_sort>

Report:
"#;

/// Fill `{name}` slots in `template`. `{{` and `}}` produce literal braces.
pub fn render(template: &str, slots: &[(&str, &str)]) -> Result<String, PromptError> {
    let mut out = String::with_capacity(template.len());
    let mut offset = 0;
    while let Some(rel) = template[offset..].find(|ch: char| ch == '{' || ch == '}') {
        let pos = offset + rel;
        out.push_str(&template[offset..pos]);
        let tail = &template[pos..];
        if tail.starts_with("{{") {
            out.push('{');
            offset = pos + 2;
        } else if tail.starts_with("}}") {
            out.push('}');
            offset = pos + 2;
        } else if tail.starts_with('}') {
            out.push('}');
            offset = pos + 1;
        } else {
            let end = tail.find('}').ok_or(PromptError::Unterminated(pos))?;
            let name = &tail[1..end];
            let value = slots
                .iter()
                .find(|(slot, _)| *slot == name)
                .map(|(_, value)| *value)
                .ok_or_else(|| PromptError::MissingSlot(name.to_string()))?;
            out.push_str(value);
            offset = pos + end + 1;
        }
    }
    out.push_str(&template[offset..]);
    Ok(out)
}

/// The two per-date templates, built-in or loaded from override files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub summarize: String,
    pub format: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            summarize: SUMMARIZE_TEMPLATE.to_string(),
            format: FORMAT_TEMPLATE.to_string(),
        }
    }
}

impl PromptSet {
    /// Check that both templates only reference known slots.
    pub fn validate(&self) -> Result<(), PromptError> {
        let probe = [(MEETING_DATE_SLOT, ""), (ITEMS_TEXT_SLOT, "")];
        render(&self.summarize, &probe)?;
        render(&self.format, &probe)?;
        Ok(())
    }

    pub fn summarize_prompt(&self, meeting_date: &str, items_text: &str) -> Result<String, PromptError> {
        render(
            &self.summarize,
            &[(MEETING_DATE_SLOT, meeting_date), (ITEMS_TEXT_SLOT, items_text)],
        )
    }

    /// Formatting prompt for a cleaned summary, with the no-reasoning directive appended.
    pub fn format_prompt(&self, meeting_date: &str, summary: &str) -> Result<String, PromptError> {
        let mut prompt = render(
            &self.format,
            &[(MEETING_DATE_SLOT, meeting_date), (ITEMS_TEXT_SLOT, summary)],
        )?;
        prompt.push_str(NO_THINK_DIRECTIVE);
        Ok(prompt)
    }
}

fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[.*?\]").unwrap())
}

fn clean_field(value: &str, strip_brackets: bool) -> String {
    let flat = value
        .replace("\r\n", " ")
        .replace(['\r', '\n'], " ")
        .replace('•', "-");
    let flat = if strip_brackets {
        bracket_re().replace_all(&flat, "").into_owned()
    } else {
        flat
    };
    flat.trim().to_string()
}

/// One prompt line for an agenda row.
pub fn item_line(row: &AgendaRow, strip_brackets: bool) -> String {
    let field = |value: Option<&str>| {
        value
            .map(|value| clean_field(value, strip_brackets))
            .filter(|value| !value.is_empty())
    };
    let title = field(row.title.as_deref()).unwrap_or_else(|| MISSING_TITLE.to_string());
    let section = field(row.section.as_deref()).unwrap_or_else(|| MISSING_SECTION.to_string());
    let mut line = format!("- Item: \"{title}\", Section: \"{section}\"");
    if let Some(notes) = field(row.notes.as_deref()).filter(|notes| !notes.eq_ignore_ascii_case("nan")) {
        line.push_str(&format!(", Notes: \"{notes}\""));
    }
    line
}

/// Item lines for a date group, joined with newlines.
pub fn items_text(rows: &[AgendaRow], strip_brackets: bool) -> String {
    rows.iter()
        .map(|row| item_line(row, strip_brackets))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::{NO_THINK_DIRECTIVE, PromptSet, item_line, items_text, render};
    use crate::error::PromptError;
    use crate::types::AgendaRow;

    fn row(title: &str, section: Option<&str>, notes: Option<&str>) -> AgendaRow {
        AgendaRow {
            date: "10-Sep".to_string(),
            title: Some(title.to_string()),
            section: section.map(str::to_string),
            notes: notes.map(str::to_string),
            include: true,
            ..AgendaRow::default()
        }
    }

    #[test]
    fn render_fills_slots_and_escapes() {
        let out = render("{{a}} {a} {b}}}", &[("a", "1"), ("b", "2")]).unwrap();
        assert_eq!(out, "{a} 1 2}");
    }

    #[test]
    fn render_reports_missing_slot() {
        let err = render("Date: {meeting_date} {extra}", &[("meeting_date", "x")]).unwrap_err();
        assert!(matches!(err, PromptError::MissingSlot(name) if name == "extra"));
    }

    #[test]
    fn render_reports_unterminated_slot() {
        let err = render("abc {meeting_date", &[]).unwrap_err();
        assert!(matches!(err, PromptError::Unterminated(4)));
    }

    #[test]
    fn builtin_templates_validate() {
        PromptSet::default().validate().unwrap();
    }

    #[test]
    fn override_with_unknown_slot_fails_validation() {
        let prompts = PromptSet {
            summarize: "{meeting_date} {md}".to_string(),
            ..PromptSet::default()
        };
        assert!(prompts.validate().is_err());
    }

    #[test]
    fn format_prompt_ends_with_directive() {
        let prompts = PromptSet::default();
        let prompt = prompts.format_prompt("10-Sep", "Consent: Budget").unwrap();
        assert!(prompt.ends_with(NO_THINK_DIRECTIVE));
        assert!(prompt.contains("Meeting Date: 10-Sep"));
        assert!(prompt.contains("Consent: Budget"));

        let first = prompts.summarize_prompt("10-Sep", "- Item: \"x\"").unwrap();
        assert!(!first.ends_with(NO_THINK_DIRECTIVE));
        assert!(first.contains("<summarize_these>\n- Item: \"x\"\n</summarize_these>"));
    }

    #[test]
    fn item_line_normalizes_fields() {
        let line = item_line(
            &row("Revenue\nOptions • Draft", Some("Study Session"), Some("ADD DESCRIPTION")),
            false,
        );
        assert_eq!(
            line,
            "- Item: \"Revenue Options - Draft\", Section: \"Study Session\", Notes: \"ADD DESCRIPTION\""
        );
    }

    #[test]
    fn item_line_collapses_crlf_to_one_space() {
        let line = item_line(&row("Budget\r\nAdoption\rFY26", Some("Consent"), None), false);
        assert_eq!(line, "- Item: \"Budget Adoption FY26\", Section: \"Consent\"");
    }

    #[test]
    fn item_line_omits_empty_notes_and_fills_gaps() {
        assert_eq!(
            item_line(&row("Budget", Some("Consent"), Some("nan")), false),
            "- Item: \"Budget\", Section: \"Consent\""
        );
        let blank = AgendaRow::default();
        assert_eq!(
            item_line(&blank, false),
            "- Item: \"unnamed item\", Section: \"placeholder\""
        );
    }

    #[test]
    fn item_line_strips_brackets_when_asked() {
        let item = row("Budget [moved from 6/23] Adoption", Some("Consent [CMO]"), Some("[per K.W.]"));
        assert_eq!(
            item_line(&item, true),
            "- Item: \"Budget  Adoption\", Section: \"Consent\""
        );
        assert!(item_line(&item, false).contains("[moved from 6/23]"));
    }

    #[test]
    fn items_text_keeps_row_order() {
        let rows = vec![row("a", Some("Consent"), None), row("b", Some("Study Session"), None)];
        let text = items_text(&rows, false);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"a\""));
        assert!(lines[1].contains("\"b\""));
    }
}
