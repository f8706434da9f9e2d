//! Per-file content filters.
//!
//! `lines` filters exclude absolute line numbers from a file's hash.
//! `segment` filters cut the text between two markers out of one line; they
//! are parsed and validated with the rest of the set but hashing ignores them.

use serde::Deserialize;
use serde_yaml::Value;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use tracing::info;

use crate::config::{Config, ConfigLookupError};
use crate::error::{MonitorError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFilter {
    /// Sorted, disjoint and non-adjacent.
    ranges: Vec<RangeInclusive<u64>>,
}

impl LineFilter {
    /// Parses `"2,4-6,9"`: comma separated line numbers and inclusive
    /// `lower-upper` ranges with `lower < upper`.
    pub fn parse(csv: &str) -> Result<Self> {
        let mut ranges = Vec::new();
        for token in csv.split(',').map(str::trim) {
            if let Some((lower, upper)) = token.split_once('-') {
                match (parse_line(lower), parse_line(upper)) {
                    (Some(lo), Some(hi)) if lo < hi => ranges.push(lo..=hi),
                    _ => {
                        return Err(MonitorError::config(format!(
                            "invalid filter range [{token}], expected [lower-upper]"
                        )))
                    }
                }
            } else {
                let line = parse_line(token).ok_or_else(|| {
                    MonitorError::config(format!("invalid line number [{token}] in filter"))
                })?;
                ranges.push(line..=line);
            }
        }
        Ok(Self {
            ranges: merge(ranges),
        })
    }

    pub fn contains(&self, line: u64) -> bool {
        let idx = self.ranges.partition_point(|r| *r.end() < line);
        self.ranges.get(idx).is_some_and(|r| r.contains(&line))
    }

    pub fn lines(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.iter().flat_map(|r| r.clone())
    }
}

fn merge(mut ranges: Vec<RangeInclusive<u64>>) -> Vec<RangeInclusive<u64>> {
    ranges.sort_by_key(|r| *r.start());
    let mut merged: Vec<RangeInclusive<u64>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if *range.start() <= last.end().saturating_add(1) => {
                if range.end() > last.end() {
                    *last = *last.start()..=*range.end();
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

fn parse_line(token: &str) -> Option<u64> {
    let token = token.trim();
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFilter {
    pub start: String,
    pub end: String,
    pub line: u64,
    pub all: bool,
}

impl SegmentFilter {
    pub fn new(start: impl Into<String>, end: impl Into<String>, line: u64, all: bool) -> Result<Self> {
        let (start, end) = (start.into(), end.into());
        if start.is_empty() || end.is_empty() {
            return Err(MonitorError::config("segment filter markers must not be empty"));
        }
        Ok(Self { start, end, line, all })
    }

    /// Removes the text between the start and end markers, keeping both
    /// markers. Only the first segment goes unless `all` is set.
    pub fn apply(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut pos = 0;
        loop {
            let Some(start) = text[pos..].find(&self.start).map(|i| i + pos) else {
                break;
            };
            let keep_until = start + self.start.len();
            let Some(end) = text[keep_until..].find(&self.end).map(|i| i + keep_until) else {
                break;
            };
            out.push_str(&text[pos..keep_until]);
            pos = end;
            if !self.all {
                break;
            }
        }
        out.push_str(&text[pos..]);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Lines(LineFilter),
    Segment(SegmentFilter),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum FilterEntry {
    Lines {
        file: String,
        lines: Value,
    },
    Segment {
        file: String,
        start: String,
        end: String,
        line: u64,
        #[serde(default)]
        all: bool,
    },
}

/// Path -> ordered directives, keyed by the path exactly as configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    filters: HashMap<String, Vec<Filter>>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl Into<String>, filter: Filter) {
        self.filters.entry(path.into()).or_default().push(filter);
    }

    /// Builds the set from the `filter` list. An absent list yields an empty
    /// set; any bad entry fails the whole set.
    pub fn from_config(config: &Config) -> Result<Self> {
        let entries: Vec<FilterEntry> = match config.get("filter") {
            Ok(entries) => entries,
            Err(ConfigLookupError::NotFound(_)) => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };
        let mut set = Self::new();
        for entry in entries {
            match entry {
                FilterEntry::Lines { file, lines } => {
                    let csv = match lines {
                        Value::String(s) => s,
                        Value::Number(n) => n.to_string(),
                        other => {
                            return Err(MonitorError::config(format!(
                                "lines filter for {file} must be a string, got {other:?}"
                            )))
                        }
                    };
                    info!(file = %file, "setting up lines filter");
                    set.add(file, Filter::Lines(LineFilter::parse(&csv)?));
                }
                FilterEntry::Segment {
                    file,
                    start,
                    end,
                    line,
                    all,
                } => {
                    info!(file = %file, line, "setting up segment filter");
                    set.add(file, Filter::Segment(SegmentFilter::new(start, end, line, all)?));
                }
            }
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn for_path(&self, path: &str) -> &[Filter] {
        self.filters.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True when any line filter for `path` names `line` (1-based).
    pub fn excludes(&self, path: &str, line: u64) -> bool {
        self.for_path(path).iter().any(|f| match f {
            Filter::Lines(lines) => lines.contains(line),
            Filter::Segment(_) => false,
        })
    }
}
