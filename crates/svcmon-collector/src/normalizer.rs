//! Turns parsed records into metric samples.
//!
//! Normalization only looks at the records of one command in one cycle, so
//! the same raw capture always yields the same samples. Rates are left to the
//! sink.

use crate::catalog::{CommandSpec, Derivation, Resolution};
use crate::error::NormalizationError;
use crate::parser::parse_numeric;
use svcmon_common::types::{MetricSample, ParsedRecord, Tags};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub samples: Vec<MetricSample>,
    pub errors: Vec<NormalizationError>,
}

pub fn metric_name(prefix: &str, field: &str) -> String {
    let field: String = field
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if prefix.is_empty() {
        field
    } else {
        format!("{prefix}.{field}")
    }
}

fn record_tags(spec: &CommandSpec, record: &ParsedRecord, base_tags: &Tags) -> Tags {
    let mut tags: Tags = base_tags
        .iter()
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for (column, key) in spec.rule.tags {
        if let Some(value) = record.get(column).map(str::trim).filter(|v| !v.is_empty()) {
            tags.insert((*key).to_string(), value.to_string());
        }
    }
    tags
}

fn numeric_field(record: &ParsedRecord, field: &str) -> Option<f64> {
    record.get(field).and_then(parse_numeric)
}

/// Replace placeholder values in `records` with the first usable value the
/// follow-up output holds for the same record key. Placeholders without one
/// are cleared so they never become tag values. Returns how many were cleared.
pub fn resolve_placeholders(
    records: &mut [ParsedRecord],
    resolution: &Resolution,
    lookup: &[ParsedRecord],
) -> usize {
    let mut unresolved = 0;
    for record in records.iter_mut() {
        if record.get(resolution.column) != Some(resolution.placeholder) {
            continue;
        }
        let value = lookup
            .iter()
            .filter(|row| row.key == record.key)
            .filter_map(|row| row.get(resolution.value_column))
            .find(|v| !v.is_empty() && *v != resolution.placeholder)
            .unwrap_or_default()
            .to_string();
        if value.is_empty() {
            unresolved += 1;
        }
        record.fields.insert(resolution.column.to_string(), value);
    }
    unresolved
}

/// Normalize one command's records. `base_tags` are attached to every sample;
/// record tags win on key collisions.
pub fn normalize(
    spec: &CommandSpec,
    records: &[ParsedRecord],
    base_tags: &Tags,
    timestamp: i64,
) -> Normalized {
    let rule = &spec.rule;
    let mut out = Normalized::default();
    let mut valid: Vec<&ParsedRecord> = Vec::with_capacity(records.len());

    for record in records {
        let missing = rule
            .required
            .iter()
            .find(|field| record.get(field).map_or(true, |v| v.trim().is_empty()));
        if let Some(field) = missing {
            out.errors.push(NormalizationError {
                command: spec.name.to_string(),
                record: record.key.clone(),
                field: (*field).to_string(),
            });
            continue;
        }
        valid.push(record);

        let tags = record_tags(spec, record, base_tags);
        for (field, raw) in &record.fields {
            if !rule.selects(field) {
                continue;
            }
            if let Some(value) = parse_numeric(raw) {
                out.samples.push(MetricSample {
                    name: metric_name(rule.prefix, field),
                    value,
                    tags: tags.clone(),
                    timestamp,
                });
            }
        }

        for derivation in rule.derivations {
            if let Derivation::Ratio {
                name,
                numerator,
                denominator,
                scale,
            } = *derivation
            {
                let (Some(num), Some(den)) = (
                    numeric_field(record, numerator),
                    numeric_field(record, denominator),
                ) else {
                    continue;
                };
                let value = if den == 0.0 { 0.0 } else { num / den * scale };
                out.samples.push(MetricSample {
                    name: metric_name(rule.prefix, name),
                    value,
                    tags: tags.clone(),
                    timestamp,
                });
            }
        }
    }

    for derivation in rule.derivations {
        if let Derivation::Total { name, field } = *derivation {
            let values: Vec<f64> = valid
                .iter()
                .filter_map(|record| numeric_field(record, field))
                .collect();
            if values.is_empty() {
                continue;
            }
            out.samples.push(MetricSample {
                name: metric_name(rule.prefix, name),
                value: values.iter().sum(),
                tags: record_tags(spec, &ParsedRecord::new(""), base_tags),
                timestamp,
            });
        }
    }

    out
}
