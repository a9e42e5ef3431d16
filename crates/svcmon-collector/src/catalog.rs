//! The fixed set of cluster CLI commands run every cycle.

use crate::parser::{Delimiter, Parser};

/// How a command's parsed records become metric samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeRule {
    /// First segment of every metric name produced by the command.
    pub prefix: &'static str,
    /// `(column, tag key)` pairs. Tag columns never produce samples.
    pub tags: &'static [(&'static str, &'static str)],
    /// Columns never turned into samples.
    pub ignore: &'static [&'static str],
    /// When non-empty, only these columns are turned into samples.
    pub include: &'static [&'static str],
    /// Columns a record must carry (non-empty) to be normalized at all.
    pub required: &'static [&'static str],
    pub derivations: &'static [Derivation],
}

impl NormalizeRule {
    pub fn tag_key(&self, column: &str) -> Option<&'static str> {
        self.tags
            .iter()
            .find(|(col, _)| *col == column)
            .map(|(_, key)| *key)
    }

    pub fn selects(&self, column: &str) -> bool {
        self.tag_key(column).is_none()
            && !self.ignore.contains(&column)
            && (self.include.is_empty() || self.include.contains(&column))
    }
}

/// Metrics computed from other fields of the same cycle's records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Derivation {
    /// `numerator / denominator * scale` for each record; 0 when the
    /// denominator is 0.
    Ratio {
        name: &'static str,
        numerator: &'static str,
        denominator: &'static str,
        scale: f64,
    },
    /// Sum of `field` across all records of the command.
    Total {
        name: &'static str,
        field: &'static str,
    },
}

/// A placeholder column value replaced with data from a follow-up command
/// run in the same cycle, e.g. volumes whose pool is reported as `many`.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub column: &'static str,
    pub placeholder: &'static str,
    pub command: &'static str,
    /// Must key its records the same way as the owning command.
    pub parser: Parser,
    pub value_column: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub command: &'static str,
    pub parser: Parser,
    pub rule: NormalizeRule,
    pub resolve: Option<Resolution>,
}

const DELIM: Delimiter = Delimiter::Char(':');

/// The commands collected from an SVC / Storwize cluster, in execution order.
pub fn default_catalog() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "system",
            command: "lssystem -delim :",
            parser: Parser::Block {
                delimiter: DELIM,
                sentinel: "name",
            },
            rule: NormalizeRule {
                prefix: "system",
                include: &[
                    "total_mdisk_capacity",
                    "space_in_mdisk_grps",
                    "space_allocated_to_vdisks",
                    "total_free_space",
                    "total_vdiskcopy_capacity",
                    "total_used_capacity",
                    "total_overallocation",
                    "total_vdisk_capacity",
                    "total_allocated_extent_capacity",
                ],
                required: &["total_mdisk_capacity"],
                derivations: &[Derivation::Ratio {
                    name: "used_ratio",
                    numerator: "total_used_capacity",
                    denominator: "total_mdisk_capacity",
                    scale: 1.0,
                }],
                ..NormalizeRule::default()
            },
            resolve: None,
        },
        CommandSpec {
            name: "iogrp",
            command: "lsiogrp -delim :",
            parser: Parser::Table {
                delimiter: DELIM,
                key_column: "name",
                numeric_columns: &["node_count", "vdisk_count", "host_count"],
            },
            rule: NormalizeRule {
                prefix: "iogrp",
                tags: &[("name", "io_group"), ("site_name", "site")],
                ignore: &["id", "site_id"],
                ..NormalizeRule::default()
            },
            resolve: None,
        },
        CommandSpec {
            name: "mdiskgrp",
            command: "lsmdiskgrp -bytes -delim :",
            parser: Parser::Table {
                delimiter: DELIM,
                key_column: "name",
                numeric_columns: &["capacity", "free_capacity", "used_capacity"],
            },
            rule: NormalizeRule {
                prefix: "mdiskgrp",
                tags: &[("name", "pool"), ("status", "status")],
                include: &[
                    "mdisk_count",
                    "vdisk_count",
                    "capacity",
                    "free_capacity",
                    "virtual_capacity",
                    "used_capacity",
                    "real_capacity",
                    "overallocation",
                ],
                required: &["capacity"],
                derivations: &[
                    Derivation::Ratio {
                        name: "used_ratio",
                        numerator: "used_capacity",
                        denominator: "capacity",
                        scale: 1.0,
                    },
                    Derivation::Total {
                        name: "total_capacity",
                        field: "capacity",
                    },
                    Derivation::Total {
                        name: "total_free_capacity",
                        field: "free_capacity",
                    },
                ],
                ..NormalizeRule::default()
            },
            resolve: None,
        },
        CommandSpec {
            name: "vdisk",
            command: "lsvdisk -bytes -delim :",
            parser: Parser::Table {
                delimiter: DELIM,
                key_column: "name",
                numeric_columns: &["capacity"],
            },
            rule: NormalizeRule {
                prefix: "vdisk",
                tags: &[
                    ("name", "volume"),
                    ("IO_group_name", "io_group"),
                    ("mdisk_grp_name", "pool"),
                ],
                include: &["capacity"],
                derivations: &[Derivation::Total {
                    name: "total_capacity",
                    field: "capacity",
                }],
                ..NormalizeRule::default()
            },
            resolve: Some(Resolution {
                column: "mdisk_grp_name",
                placeholder: "many",
                command: "lsvdiskcopy -delim :",
                parser: Parser::Table {
                    delimiter: DELIM,
                    key_column: "vdisk_name",
                    numeric_columns: &[],
                },
                value_column: "mdisk_grp_name",
            }),
        },
        CommandSpec {
            name: "nodestats",
            command: "lsnodestats -delim :",
            parser: Parser::StatTable {
                delimiter: DELIM,
                entity_column: Some("node_name"),
                stat_column: "stat_name",
                current_column: "stat_current",
                peak_column: Some("stat_peak"),
                default_key: "node",
            },
            rule: NormalizeRule {
                prefix: "nodestats",
                tags: &[("node_name", "node")],
                ..NormalizeRule::default()
            },
            resolve: None,
        },
        CommandSpec {
            name: "systemstats",
            command: "lssystemstats -delim :",
            parser: Parser::StatTable {
                delimiter: DELIM,
                entity_column: None,
                stat_column: "stat_name",
                current_column: "stat_current",
                peak_column: Some("stat_peak"),
                default_key: "system",
            },
            rule: NormalizeRule {
                prefix: "systemstats",
                ..NormalizeRule::default()
            },
            resolve: None,
        },
    ]
}
