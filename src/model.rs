//! Data types flowing through the ingestion pipeline
//!
//! A [`RawLine`] is produced once by the line source and consumed by exactly
//! one consumer. Consumers turn candidate lines into [`Point`]s and collect
//! them in a worker-local [`Batch`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::str::FromStr;

/// Measurement name used for every operation point
pub const MEASUREMENT: &str = "operations";

/// Field key that always carries the operation duration
pub const DURATION_FIELD: &str = "duration_in_milliseconds";

/// One physical input line, newline included, with its position in the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub bytes: Vec<u8>,
    /// 1-based ordinal of the line in the input
    pub line_number: u64,
    /// Byte offset of the first byte of the line
    pub offset: u64,
}

impl RawLine {
    pub fn new(bytes: Vec<u8>, line_number: u64, offset: u64) -> Self {
        Self {
            bytes,
            line_number,
            offset,
        }
    }
}

/// Operation kinds that produce points. Anything else is non-operation traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Command,
    Query,
    Getmore,
    Insert,
    Update,
    Remove,
    Aggregate,
    Mapreduce,
}

impl OperationKind {
    pub const ALL: [OperationKind; 8] = [
        OperationKind::Command,
        OperationKind::Query,
        OperationKind::Getmore,
        OperationKind::Insert,
        OperationKind::Update,
        OperationKind::Remove,
        OperationKind::Aggregate,
        OperationKind::Mapreduce,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Command => "command",
            OperationKind::Query => "query",
            OperationKind::Getmore => "getmore",
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Remove => "remove",
            OperationKind::Aggregate => "aggregate",
            OperationKind::Mapreduce => "mapreduce",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or(())
    }
}

/// Tags fixed for the whole run and stamped onto every point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTags {
    pub project: String,
    pub hostname: String,
}

/// Tag set of one operation point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTags {
    pub project: String,
    pub hostname: String,
    pub operation: OperationKind,
    pub command: Option<String>,
    pub connection_id: Option<String>,
    pub namespace: Option<String>,
    pub plan_summary: Option<String>,
}

impl OperationTags {
    pub fn new(pipeline: &PipelineTags, operation: OperationKind) -> Self {
        Self {
            project: pipeline.project.clone(),
            hostname: pipeline.hostname.clone(),
            operation,
            command: None,
            connection_id: None,
            namespace: None,
            plan_summary: None,
        }
    }

    /// Populated tags as (key, value) pairs in key order
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = Vec::with_capacity(7);
        if let Some(command) = &self.command {
            pairs.push(("command", command.as_str()));
        }
        if let Some(connection_id) = &self.connection_id {
            pairs.push(("connection_id", connection_id.as_str()));
        }
        pairs.push(("hostname", self.hostname.as_str()));
        if let Some(namespace) = &self.namespace {
            pairs.push(("namespace", namespace.as_str()));
        }
        pairs.push(("operation", self.operation.as_str()));
        if let Some(plan_summary) = &self.plan_summary {
            pairs.push(("plan_summary", plan_summary.as_str()));
        }
        pairs.push(("project", self.project.as_str()));
        pairs
    }
}

/// Integer fields of one operation point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFields {
    pub duration_in_milliseconds: i64,
    counters: BTreeMap<String, i64>,
}

impl OperationFields {
    pub fn new(duration_in_milliseconds: i64) -> Self {
        Self {
            duration_in_milliseconds,
            counters: BTreeMap::new(),
        }
    }

    /// Record a counter. Later values for the same key win, and a counter
    /// named like the duration field replaces the duration.
    pub fn insert(&mut self, key: &str, value: i64) {
        if key == DURATION_FIELD {
            self.duration_in_milliseconds = value;
        } else {
            self.counters.insert(key.to_string(), value);
        }
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        if key == DURATION_FIELD {
            Some(self.duration_in_milliseconds)
        } else {
            self.counters.get(key).copied()
        }
    }

    pub fn counters(&self) -> &BTreeMap<String, i64> {
        &self.counters
    }

    /// Number of fields including the duration
    pub fn len(&self) -> usize {
        self.counters.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// All fields, duration included, in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        let duration = std::iter::once((DURATION_FIELD, self.duration_in_milliseconds));
        let mut merged: Vec<(&str, i64)> = self
            .counters
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .chain(duration)
            .collect();
        merged.sort_by(|a, b| a.0.cmp(b.0));
        merged.into_iter()
    }
}

/// One time-series record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    pub measurement: &'static str,
    pub timestamp: DateTime<Utc>,
    pub tags: OperationTags,
    pub fields: OperationFields,
}

impl Point {
    pub fn new(timestamp: DateTime<Utc>, tags: OperationTags, fields: OperationFields) -> Self {
        Self {
            measurement: MEASUREMENT,
            timestamp,
            tags,
            fields,
        }
    }

    /// Render the point as one InfluxDB line protocol record (nanosecond precision).
    /// Timestamps outside the nanosecond range are left for the server to assign.
    pub fn to_line_protocol(&self) -> String {
        let mut out = String::with_capacity(256);
        escape_into(&mut out, self.measurement, &[',', ' ']);

        for (key, value) in self.tags.pairs() {
            if value.is_empty() {
                continue;
            }
            out.push(',');
            escape_into(&mut out, key, &[',', '=', ' ']);
            out.push('=');
            escape_into(&mut out, value, &[',', '=', ' ']);
        }

        let mut first = true;
        for (key, value) in self.fields.iter() {
            out.push(if first { ' ' } else { ',' });
            first = false;
            escape_into(&mut out, key, &[',', '=', ' ']);
            let _ = write!(out, "={}i", value);
        }

        if let Some(nanos) = self.timestamp.timestamp_nanos_opt() {
            let _ = write!(out, " {}", nanos);
        }
        out
    }
}

fn escape_into(out: &mut String, raw: &str, special: &[char]) {
    for c in raw.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Worker-local accumulation of points awaiting one write call
#[derive(Debug)]
pub struct Batch {
    points: Vec<Point>,
    max_size: usize,
}

impl Batch {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            points: Vec::with_capacity(max_size.min(10_000)),
            max_size,
        }
    }

    pub fn push(&mut self, point: Point) {
        self.points.push(point);
    }

    pub fn is_full(&self) -> bool {
        self.points.len() >= self.max_size
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Hand the accumulated points to the caller, leaving the batch empty
    pub fn take(&mut self) -> Vec<Point> {
        std::mem::take(&mut self.points)
    }
}
