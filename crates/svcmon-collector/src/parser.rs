//! Parsers for the cluster CLI's semi-structured text output.
//!
//! Three output shapes are understood:
//!
//! - [`Parser::Table`]: a header row followed by one row per entity
//!   (`lsiogrp -delim :`).
//! - [`Parser::Block`]: `key value` lines, one block per entity
//!   (`lssystem`).
//! - [`Parser::StatTable`]: long-form statistics, one row per statistic,
//!   pivoted into one record per entity (`lsnodestats`).
//!
//! Rows that do not fit are skipped and reported as [`ParseError`]s; the rest
//! of the output is still parsed, since column sets drift between firmware
//! levels.

use crate::error::ParseError;
use std::collections::BTreeMap;
use svcmon_common::types::ParsedRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// Cells separated by one character, as printed with `-delim`.
    Char(char),
    /// Aligned columns separated by runs of whitespace.
    Whitespace,
}

impl Delimiter {
    fn split<'a>(&self, line: &'a str) -> Vec<&'a str> {
        match self {
            Delimiter::Char(c) => line.split(*c).map(str::trim).collect(),
            Delimiter::Whitespace => line.split_whitespace().collect(),
        }
    }

    fn split_pair<'a>(&self, line: &'a str) -> (&'a str, &'a str) {
        let line = line.trim();
        let split = match self {
            Delimiter::Char(c) => line.split_once(*c),
            Delimiter::Whitespace => line.split_once(char::is_whitespace),
        };
        match split {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, ""),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Parser {
    Table {
        delimiter: Delimiter,
        key_column: &'static str,
        /// Columns whose non-empty values must be numeric for the row to be kept.
        numeric_columns: &'static [&'static str],
    },
    /// `field<delim>value` lines. Blocks end at a blank line or when a field
    /// name repeats.
    Block {
        delimiter: Delimiter,
        /// Field whose value keys the record.
        sentinel: &'static str,
    },
    StatTable {
        delimiter: Delimiter,
        /// Column naming the entity; `None` when the table describes one entity.
        entity_column: Option<&'static str>,
        stat_column: &'static str,
        current_column: &'static str,
        peak_column: Option<&'static str>,
        /// Record key used when there is no entity column.
        default_key: &'static str,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutput {
    pub records: Vec<ParsedRecord>,
    pub errors: Vec<ParseError>,
}

impl ParseOutput {
    fn skip(&mut self, line: usize, reason: impl Into<String>) {
        self.errors.push(ParseError {
            line,
            reason: reason.into(),
        });
    }
}

impl Parser {
    pub fn parse(&self, raw: &str) -> ParseOutput {
        match self {
            Parser::Table {
                delimiter,
                key_column,
                numeric_columns,
            } => parse_table(raw, *delimiter, key_column, numeric_columns),
            Parser::Block {
                delimiter,
                sentinel,
            } => parse_blocks(raw, *delimiter, sentinel),
            Parser::StatTable {
                delimiter,
                entity_column,
                stat_column,
                current_column,
                peak_column,
                default_key,
            } => parse_stat_table(
                raw,
                *delimiter,
                StatColumns {
                    entity: *entity_column,
                    stat: stat_column,
                    current: current_column,
                    peak: *peak_column,
                    default_key,
                },
            ),
        }
    }
}

/// Parse a CLI value as a number.
///
/// Accepts plain numbers, a trailing `%`, and the capacity units the CLI
/// prints without `-bytes` (binary multiples, converted to bytes).
///
/// # Examples
///
/// ```
/// use svcmon_collector::parser::parse_numeric;
///
/// assert_eq!(parse_numeric("42"), Some(42.0));
/// assert_eq!(parse_numeric("80%"), Some(80.0));
/// assert_eq!(parse_numeric("1.50GB"), Some(1.5 * 1024.0 * 1024.0 * 1024.0));
/// assert_eq!(parse_numeric("io_grp0"), None);
/// assert_eq!(parse_numeric(""), None);
/// ```
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let s = raw.trim();
    let s = s.strip_suffix('%').unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    let (number, multiplier) = split_unit(s);
    let value = number.parse::<f64>().ok()? * multiplier;
    value.is_finite().then_some(value)
}

const UNITS: [(&str, f64); 6] = [
    ("PB", 1_125_899_906_842_624.0),
    ("TB", 1_099_511_627_776.0),
    ("GB", 1_073_741_824.0),
    ("MB", 1_048_576.0),
    ("KB", 1024.0),
    ("B", 1.0),
];

fn split_unit(s: &str) -> (&str, f64) {
    for (suffix, multiplier) in UNITS {
        if let Some(number) = s.strip_suffix(suffix) {
            if number.ends_with(|c: char| c.is_ascii_digit() || c == '.') {
                return (number, multiplier);
            }
        }
    }
    (s, 1.0)
}

fn is_decoration(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| matches!(c, '-' | '=' | '+' | '|') || c.is_whitespace())
}

/// Non-blank, non-decoration lines with their 1-based line numbers.
fn content_lines(raw: &str) -> impl Iterator<Item = (usize, &str)> {
    raw.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.trim().is_empty() && !is_decoration(line))
}

struct Header {
    columns: Vec<String>,
}

impl Header {
    fn new(cells: Vec<&str>) -> Self {
        Self {
            columns: cells.into_iter().map(str::to_string).collect(),
        }
    }

    fn index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

fn parse_table(
    raw: &str,
    delimiter: Delimiter,
    key_column: &str,
    numeric_columns: &[&str],
) -> ParseOutput {
    let mut out = ParseOutput::default();
    let mut lines = content_lines(raw);

    let Some((header_line, header)) = lines.next() else {
        return out;
    };
    let header = Header::new(delimiter.split(header));
    let Some(key_idx) = header.index(key_column) else {
        out.skip(header_line, format!("header has no '{key_column}' column"));
        return out;
    };
    let numeric: Vec<(usize, &str)> = numeric_columns
        .iter()
        .filter_map(|col| header.index(col).map(|idx| (idx, *col)))
        .collect();

    'rows: for (line_no, line) in lines {
        let cells = delimiter.split(line);
        if cells.len() != header.columns.len() {
            out.skip(
                line_no,
                format!(
                    "expected {} columns, found {}",
                    header.columns.len(),
                    cells.len()
                ),
            );
            continue;
        }

        let key = cells[key_idx];
        if key.is_empty() {
            out.skip(line_no, format!("empty '{key_column}'"));
            continue;
        }

        for (idx, col) in &numeric {
            let value = cells[*idx];
            if !value.is_empty() && parse_numeric(value).is_none() {
                out.skip(
                    line_no,
                    format!("non-numeric value '{value}' in column '{col}'"),
                );
                continue 'rows;
            }
        }

        let mut record = ParsedRecord::new(key);
        for (column, cell) in header.columns.iter().zip(cells) {
            record.fields.insert(column.clone(), cell.to_string());
        }
        out.records.push(record);
    }

    out
}

fn parse_blocks(raw: &str, delimiter: Delimiter, sentinel: &str) -> ParseOutput {
    let mut out = ParseOutput::default();
    let mut block: BTreeMap<String, String> = BTreeMap::new();
    let mut block_start = 0;

    let flush = |block: &mut BTreeMap<String, String>, start: usize, out: &mut ParseOutput| {
        if block.is_empty() {
            return;
        }
        let fields = std::mem::take(block);
        let key = fields.get(sentinel).filter(|v| !v.is_empty()).cloned();
        match key {
            Some(key) => out.records.push(ParsedRecord { key, fields }),
            None => out.skip(start, format!("block has no '{sentinel}' field")),
        }
    };

    for (idx, line) in raw.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            flush(&mut block, block_start, &mut out);
            continue;
        }
        if is_decoration(line) {
            continue;
        }

        let (key, value) = delimiter.split_pair(line);
        if key.is_empty() {
            out.skip(line_no, "line has no field name");
            continue;
        }
        // A repeated field name means the next entity has started.
        if block.contains_key(key) {
            flush(&mut block, block_start, &mut out);
        }
        if block.is_empty() {
            block_start = line_no;
        }
        block.insert(key.to_string(), value.to_string());
    }
    flush(&mut block, block_start, &mut out);

    out
}

struct StatColumns<'a> {
    entity: Option<&'a str>,
    stat: &'a str,
    current: &'a str,
    peak: Option<&'a str>,
    default_key: &'a str,
}

fn parse_stat_table(raw: &str, delimiter: Delimiter, columns: StatColumns<'_>) -> ParseOutput {
    let mut out = ParseOutput::default();
    let mut lines = content_lines(raw);

    let Some((header_line, header)) = lines.next() else {
        return out;
    };
    let header = Header::new(delimiter.split(header));

    let entity_idx = match columns.entity {
        Some(col) => match header.index(col) {
            Some(idx) => Some(idx),
            None => {
                out.skip(header_line, format!("header has no '{col}' column"));
                return out;
            }
        },
        None => None,
    };
    let (Some(stat_idx), Some(current_idx)) =
        (header.index(columns.stat), header.index(columns.current))
    else {
        out.skip(
            header_line,
            format!(
                "header needs '{}' and '{}' columns",
                columns.stat, columns.current
            ),
        );
        return out;
    };
    let peak_idx = columns.peak.and_then(|col| header.index(col));

    let mut by_entity: BTreeMap<String, usize> = BTreeMap::new();

    for (line_no, line) in lines {
        let cells = delimiter.split(line);
        if cells.len() != header.columns.len() {
            out.skip(
                line_no,
                format!(
                    "expected {} columns, found {}",
                    header.columns.len(),
                    cells.len()
                ),
            );
            continue;
        }

        let entity = entity_idx.map_or(columns.default_key, |idx| cells[idx]);
        if entity.is_empty() {
            out.skip(line_no, "empty entity name");
            continue;
        }
        let stat = cells[stat_idx];
        if stat.is_empty() {
            out.skip(line_no, format!("empty '{}'", columns.stat));
            continue;
        }
        let current = cells[current_idx];
        if parse_numeric(current).is_none() {
            out.skip(
                line_no,
                format!("non-numeric value '{current}' for statistic '{stat}'"),
            );
            continue;
        }

        let slot = *by_entity.entry(entity.to_string()).or_insert_with(|| {
            let mut record = ParsedRecord::new(entity);
            if let Some(col) = columns.entity {
                record.fields.insert(col.to_string(), entity.to_string());
            }
            out.records.push(record);
            out.records.len() - 1
        });
        let record = &mut out.records[slot];
        record.fields.insert(stat.to_string(), current.to_string());
        if let Some(peak) = peak_idx.map(|idx| cells[idx]) {
            if parse_numeric(peak).is_some() {
                record.fields.insert(format!("{stat}_peak"), peak.to_string());
            }
        }
    }

    out
}
