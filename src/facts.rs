//! QuickFacts fact tables.
//!
//! The CSV export carries one column per geography plus note columns, and
//! ends with a `FIPS Code` row followed by free-form footnotes.

pub const FIPS_ROW: &str = "FIPS Code";

pub type Rows = Vec<Vec<String>>;

/// RFC 4180 reader: quoted fields may contain commas, doubled quotes and newlines.
/// A leading byte order mark is ignored.
pub fn parse_csv(text: &str) -> Rows {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(ch),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows.retain(|row| !(row.len() == 1 && row[0].is_empty()));
    rows
}

pub fn write_csv(rows: &Rows) -> String {
    let mut out = String::new();
    for row in rows {
        let line = row
            .iter()
            .map(|field| quote_field(field))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn is_note_header(header: &str) -> bool {
    header == "Fact Note" || header.starts_with("Value Note for")
}

/// Drops note columns, cuts everything after the `FIPS Code` row and strips
/// stray quotes from the codes. Cleaning an already clean table is a no-op.
pub fn clean_rows(rows: &[Vec<String>]) -> Rows {
    let Some(headers) = rows.first() else {
        return Vec::new();
    };
    let keep: Vec<bool> = headers.iter().map(|header| !is_note_header(header)).collect();

    let mut cleaned = Vec::new();
    for row in rows {
        let filtered: Vec<String> = row
            .iter()
            .enumerate()
            .filter(|(index, _)| keep.get(*index).copied().unwrap_or(true))
            .map(|(_, value)| value.clone())
            .collect();
        let is_fips = filtered.first().is_some_and(|first| first == FIPS_ROW);
        cleaned.push(filtered);
        if is_fips {
            break;
        }
    }

    if let Some(last) = cleaned.last_mut() {
        if last.first().is_some_and(|first| first == FIPS_ROW) {
            for value in last.iter_mut() {
                *value = value.replace('"', "");
            }
        }
    }
    cleaned
}

/// Geography labels and FIPS codes carried by a cleaned table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactsTable {
    pub labels: Vec<String>,
    pub codes: Vec<String>,
}

impl FactsTable {
    /// `None` when the table has no header or no `FIPS Code` row.
    pub fn from_clean_rows(rows: &[Vec<String>]) -> Option<Self> {
        let header = rows.first()?;
        let fips = rows.last()?;
        if rows.len() < 2 || fips.first().map(String::as_str) != Some(FIPS_ROW) {
            return None;
        }
        Some(Self {
            labels: header.iter().skip(1).map(|label| label.trim().to_string()).collect(),
            codes: fips.iter().skip(1).map(|code| code.trim().to_string()).collect(),
        })
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|candidate| candidate == label)
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.codes.iter().any(|candidate| candidate == code)
    }
}
