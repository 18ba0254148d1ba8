//! Operation line classifier and field parser
//!
//! A decoded line is a *candidate* when it ends in `ms`. Candidates are split
//! into an operation point using one of two mutually exclusive layouts:
//!
//! * Format A (2.4 servers): the second whitespace token starts with `[`,
//!   the namespace is token 3 and counters trail the line, optionally behind a
//!   `locks(micros)` marker.
//! * Format B (3.x servers): the namespace is token 5, counters sit directly in
//!   front of the `locks:{` section and a `planSummary: ` may be present.
//!
//! Parsing never panics; every point where the layout can surprise us is a
//! [`ParseError`] carried in [`LineOutcome::Malformed`].

use crate::model::{OperationFields, OperationKind, OperationTags, PipelineTags, Point};
use crate::timestamp::parse_timestamp;

const OPERATION_DELIMITER: &str = "] ";
const COMMAND_MARKER: &str = "command: ";
const LOCKS_MARKER: &str = "locks:{";
const PLAN_SUMMARY_MARKER: &str = "planSummary: ";
const LOCKS_MICROS_MARKER: &str = "locks(micros)";

/// Result of feeding one line through the parser
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Parsed(Point),
    Skipped(SkipReason),
    Malformed(ParseError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Line does not end in `ms`
    NotCandidate,
    /// Candidate line whose operation token is outside the known kinds
    NonOperation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("no operation token after the \"] \" delimiter")]
    MissingOperation,

    #[error("no bracketed thread name")]
    MissingThread,

    #[error("command operation without a \"command: \" name")]
    MissingCommandName,

    #[error("expected at least {needed} tokens, found {found}")]
    TooFewTokens { needed: usize, found: usize },

    #[error("invalid duration token '{0}'")]
    InvalidDuration(String),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("counter '{key}' has non-integer value '{value}'")]
    InvalidCounter { key: String, value: String },

    #[error("no \"locks:{{\" section")]
    MissingLocksSection,

    #[error("\"planSummary: \" without a value")]
    MissingPlanSummary,
}

/// Candidate lines are the ones ending in the literal `ms`
pub fn is_candidate(line: &str) -> bool {
    line.ends_with("ms")
}

/// Stateless parser; every call builds its point from scratch
#[derive(Debug, Clone)]
pub struct OperationParser {
    tags: PipelineTags,
}

impl OperationParser {
    pub fn new(tags: PipelineTags) -> Self {
        Self { tags }
    }

    pub fn tags(&self) -> &PipelineTags {
        &self.tags
    }

    /// Decode raw bytes (trailing newline stripped) and parse them
    pub fn parse(&self, raw: &[u8]) -> LineOutcome {
        match std::str::from_utf8(raw) {
            Ok(text) => self.parse_line(text.trim_end_matches('\n')),
            Err(_) => LineOutcome::Malformed(ParseError::InvalidUtf8),
        }
    }

    /// Parse an already decoded line without its trailing newline
    pub fn parse_line(&self, line: &str) -> LineOutcome {
        if !is_candidate(line) {
            return LineOutcome::Skipped(SkipReason::NotCandidate);
        }
        match self.parse_candidate(line) {
            Ok(outcome) => outcome,
            Err(e) => LineOutcome::Malformed(e),
        }
    }

    fn parse_candidate(&self, line: &str) -> Result<LineOutcome, ParseError> {
        let operation_token = line
            .split_once(OPERATION_DELIMITER)
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .ok_or(ParseError::MissingOperation)?;

        let operation = match operation_token.parse::<OperationKind>() {
            Ok(kind) => kind,
            Err(()) => {
                return Ok(LineOutcome::Skipped(SkipReason::NonOperation(
                    operation_token.to_string(),
                )))
            }
        };

        let mut tags = OperationTags::new(&self.tags, operation);

        let thread = line
            .split_once('[')
            .and_then(|(_, rest)| rest.split(']').next())
            .ok_or(ParseError::MissingThread)?;

        if operation == OperationKind::Command {
            let command = line
                .split(COMMAND_MARKER)
                .nth(1)
                .and_then(|segment| segment.split_whitespace().next())
                .ok_or(ParseError::MissingCommandName)?;
            tags.command = Some(command.to_string());
        }

        if thread.contains("conn") {
            tags.connection_id = Some(thread.to_string());
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mut fields = OperationFields::new(parse_duration(&tokens)?);

        let timestamp_token = tokens.first().copied().unwrap_or_default();
        // line protocol carries nanoseconds as i64; anything outside that
        // range would be written without a time at all
        let timestamp = parse_timestamp(timestamp_token)
            .filter(|ts| ts.timestamp_nanos_opt().is_some())
            .ok_or_else(|| ParseError::InvalidTimestamp(timestamp_token.to_string()))?;

        let second = token_at(&tokens, 1)?;
        if second.starts_with('[') {
            tags.namespace = Some(token_at(&tokens, 3)?.to_string());
            scan_counters(tokens.iter().rev().copied(), format_a_step, &mut fields)?;
        } else {
            tags.namespace = Some(token_at(&tokens, 5)?.to_string());
            let (pre_locks, _) = line
                .split_once(LOCKS_MARKER)
                .ok_or(ParseError::MissingLocksSection)?;
            scan_counters(pre_locks.split_whitespace().rev(), format_b_step, &mut fields)?;

            if let Some((_, rest)) = line.split_once(PLAN_SUMMARY_MARKER) {
                let plan = rest
                    .split_whitespace()
                    .next()
                    .ok_or(ParseError::MissingPlanSummary)?;
                tags.plan_summary = Some(plan.to_string());
            }
        }

        Ok(LineOutcome::Parsed(Point::new(timestamp, tags, fields)))
    }
}

fn token_at<'a>(tokens: &[&'a str], index: usize) -> Result<&'a str, ParseError> {
    tokens.get(index).copied().ok_or(ParseError::TooFewTokens {
        needed: index + 1,
        found: tokens.len(),
    })
}

/// The last token minus any trailing `m`/`s` characters
fn parse_duration(tokens: &[&str]) -> Result<i64, ParseError> {
    let last = tokens.last().copied().unwrap_or_default();
    last.trim_end_matches(['m', 's'])
        .parse::<i64>()
        .map_err(|_| ParseError::InvalidDuration(last.to_string()))
}

/// What the reverse counter scan does with one token
#[derive(Debug, PartialEq, Eq)]
enum ScanStep<'a> {
    Skip,
    Record(&'a str, &'a str),
    Stop,
}

/// Format A: skip anything mentioning `ms` and the `locks(micros)` marker
fn format_a_step(token: &str) -> ScanStep<'_> {
    if token.contains("ms") {
        ScanStep::Skip
    } else if let Some((key, value)) = token.split_once(':') {
        ScanStep::Record(key, value)
    } else if token == LOCKS_MICROS_MARKER {
        ScanStep::Skip
    } else {
        ScanStep::Stop
    }
}

/// Format B: only `key:value` tokens, stop at the first other token
fn format_b_step(token: &str) -> ScanStep<'_> {
    match token.split_once(':') {
        Some((key, value)) => ScanStep::Record(key, value),
        None => ScanStep::Stop,
    }
}

/// Walk tokens (already reversed) until the step function says stop.
/// Each token is visited at most once, so the scan always terminates.
fn scan_counters<'a, I, F>(
    tokens: I,
    step: F,
    fields: &mut OperationFields,
) -> Result<(), ParseError>
where
    I: Iterator<Item = &'a str>,
    F: Fn(&'a str) -> ScanStep<'a>,
{
    for token in tokens {
        match step(token) {
            ScanStep::Skip => {}
            ScanStep::Record(key, value) => {
                let parsed = value.parse::<i64>().map_err(|_| ParseError::InvalidCounter {
                    key: key.to_string(),
                    value: value.to_string(),
                })?;
                fields.insert(key, parsed);
            }
            ScanStep::Stop => break,
        }
    }
    Ok(())
}
