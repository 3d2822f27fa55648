use crate::error::GenerateError;
use crate::types::{AgendaRow, DateGroup};
use std::collections::HashMap;

/// Partition rows into per-date groups.
///
/// Group order is the order in which each date first appears. Rows inside a group
/// are stable-sorted by raw section string, so a missing section sorts first and
/// "Consent" lands ahead of "Study Session".
pub fn group_by_date(rows: &[AgendaRow]) -> Result<Vec<DateGroup>, GenerateError> {
    if rows.is_empty() {
        return Err(GenerateError::EmptyInput);
    }

    let mut groups: Vec<DateGroup> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for row in rows {
        let slot = *index.entry(row.date.as_str()).or_insert_with(|| {
            groups.push(DateGroup {
                date: row.date.clone(),
                rows: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].rows.push(row.clone());
    }

    for group in &mut groups {
        group
            .rows
            .sort_by(|a, b| a.section_key().cmp(b.section_key()));
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::group_by_date;
    use crate::error::GenerateError;
    use crate::types::AgendaRow;

    fn row(date: &str, section: Option<&str>, title: &str) -> AgendaRow {
        AgendaRow {
            date: date.to_string(),
            section: section.map(str::to_string),
            title: Some(title.to_string()),
            include: true,
            ..AgendaRow::default()
        }
    }

    #[test]
    fn groups_follow_first_appearance() {
        let rows = vec![
            row("8-Sep", Some("Consent"), "a"),
            row("25-Aug", Some("Consent"), "b"),
            row("8-Sep", Some("Consent"), "c"),
            row("1-Oct", Some("Consent"), "d"),
            row("25-Aug", Some("Consent"), "e"),
        ];
        let groups = group_by_date(&rows).unwrap();
        let dates: Vec<&str> = groups.iter().map(|g| g.date.as_str()).collect();
        assert_eq!(dates, vec!["8-Sep", "25-Aug", "1-Oct"]);
        assert_eq!(groups[0].rows.len(), 2);
        assert_eq!(groups[1].rows.len(), 2);
    }

    #[test]
    fn sections_sort_stably_with_missing_first() {
        let rows = vec![
            row("8-Sep", Some("Study Session"), "s1"),
            row("8-Sep", Some("Consent"), "c1"),
            row("8-Sep", None, "none"),
            row("8-Sep", Some("Consent"), "c2"),
            row("8-Sep", Some("Study Session"), "s2"),
        ];
        let groups = group_by_date(&rows).unwrap();
        let titles: Vec<&str> = groups[0]
            .rows
            .iter()
            .map(|r| r.title.as_deref().unwrap_or(""))
            .collect();
        assert_eq!(titles, vec!["none", "c1", "c2", "s1", "s2"]);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(group_by_date(&[]), Err(GenerateError::EmptyInput)));
    }
}
