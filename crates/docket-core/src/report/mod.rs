mod markdown;

pub use markdown::ReportDocument;

use time::{Date, Month};

/// The five fixed section headers, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    StudySession,
    ClosedSession,
    SpecialPresentations,
    Consent,
    ConsiderationOrPublicHearing,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::StudySession,
        Section::ClosedSession,
        Section::SpecialPresentations,
        Section::Consent,
        Section::ConsiderationOrPublicHearing,
    ];

    pub fn header(self) -> &'static str {
        match self {
            Section::StudySession => "Study Session:",
            Section::ClosedSession => "Closed Session:",
            Section::SpecialPresentations => "Special Presentations:",
            Section::Consent => "Consent:",
            Section::ConsiderationOrPublicHearing => "Consideration or Public Hearing:",
        }
    }

    fn matching(line: &str) -> Option<Section> {
        Self::ALL
            .into_iter()
            .find(|section| line.starts_with(section.header()))
    }
}

/// A classified non-blank line of report text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportLine {
    /// Anything that is neither an item nor a section header.
    DateHeader(String),
    /// The whole header line, including a trailing `TBD` when present.
    Section(Section, String),
    /// Item text with the leading `"- "` removed.
    Item(String),
}

pub fn parse_report(text: &str) -> Vec<ReportLine> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            if let Some(item) = line.strip_prefix("- ") {
                ReportLine::Item(item.trim().to_string())
            } else if let Some(section) = Section::matching(line) {
                ReportLine::Section(section, line.to_string())
            } else {
                ReportLine::DateHeader(line.to_string())
            }
        })
        .collect()
}

/// Parse a `DD-Mon` meeting key such as `25-Aug` in `year`.
pub fn parse_meeting_date(key: &str, year: i32) -> Option<Date> {
    let (day, month) = key.trim().split_once('-')?;
    let day: u8 = day.trim().parse().ok()?;
    let month = month_from_abbrev(month.trim())?;
    Date::from_calendar_date(year, month, day).ok()
}

fn month_from_abbrev(abbrev: &str) -> Option<Month> {
    const NAMES: [(&str, Month); 12] = [
        ("jan", Month::January),
        ("feb", Month::February),
        ("mar", Month::March),
        ("apr", Month::April),
        ("may", Month::May),
        ("jun", Month::June),
        ("jul", Month::July),
        ("aug", Month::August),
        ("sep", Month::September),
        ("oct", Month::October),
        ("nov", Month::November),
        ("dec", Month::December),
    ];
    if abbrev.len() != 3 {
        return None;
    }
    let lower = abbrev.to_ascii_lowercase();
    NAMES
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, month)| *month)
}

/// Title range spanned by the earliest and latest meeting keys.
///
/// Keys carry no year, so the current year is assumed. When the keys straddle a
/// year end (the widest gap between their months is inside the year rather than
/// across December), the months after that gap belong to the following year.
/// Any unparsable key falls back to the current month.
pub fn month_range(dates: &[String], today: Date) -> String {
    let fallback = format!("{} {}", today.month(), today.year());
    let year = today.year();
    let Some(parsed) = dates
        .iter()
        .map(|key| parse_meeting_date(key, year))
        .collect::<Option<Vec<Date>>>()
    else {
        return fallback;
    };

    let rollover = rollover_month(&parsed);
    let placed: Vec<Date> = parsed
        .into_iter()
        .map(|date| match rollover {
            Some(limit) if u8::from(date.month()) < limit => {
                date.replace_year(year + 1).unwrap_or(date)
            }
            _ => date,
        })
        .collect();
    let (Some(first), Some(last)) = (placed.iter().min(), placed.iter().max()) else {
        return fallback;
    };

    if first.year() != last.year() {
        format!(
            "{} {} - {} {}",
            first.month(),
            first.year(),
            last.month(),
            last.year()
        )
    } else if first.month() == last.month() {
        format!("{} {}", first.month(), first.year())
    } else {
        format!("{} - {}, {}", first.month(), last.month(), first.year())
    }
}

/// Month number below which keys move into the following year, if any.
fn rollover_month(dates: &[Date]) -> Option<u8> {
    let mut months: Vec<u8> = dates.iter().map(|date| u8::from(date.month())).collect();
    months.sort_unstable();
    months.dedup();
    let (first, last) = (*months.first()?, *months.last()?);
    let across_year_end = first + 12 - last;
    months
        .windows(2)
        .filter(|pair| pair[1] - pair[0] > across_year_end)
        .max_by_key(|pair| pair[1] - pair[0])
        .map(|pair| pair[1])
}

/// `Month DD, YYYY`, zero-padded day.
pub fn long_date(date: Date) -> String {
    format!("{} {:02}, {}", date.month(), date.day(), date.year())
}
