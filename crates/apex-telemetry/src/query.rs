//! Database query tracking and N+1 detection

use crate::collector::SharedCollector;
use crate::digest::sha256_hex;
use crate::frames::{find_frame, is_application_frame, RawFrame};
use apex_core::models::{N1Group, QueryRecord};
use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

/// A pattern seen more often than this within one unit is an N+1 group
pub const N1_THRESHOLD: usize = 3;

struct Normalizer {
    whitespace: Regex,
    string_literal: Regex,
    numeric_literal: Regex,
    in_list: Regex,
}

fn normalizer() -> Option<&'static Normalizer> {
    static NORMALIZER: OnceLock<Option<Normalizer>> = OnceLock::new();
    NORMALIZER
        .get_or_init(|| {
            Some(Normalizer {
                whitespace: Regex::new(r"\s+").ok()?,
                string_literal: Regex::new(r"'(?:[^'\\]|\\.|'')*'").ok()?,
                numeric_literal: Regex::new(r"(^|[\s=<>!,(+\-*/])-?\d+(?:\.\d+)?\b").ok()?,
                in_list: Regex::new(r"(?i)\b(IN)\s*\(\s*\?(?:\s*,\s*\?)*\s*\)").ok()?,
            })
        })
        .as_ref()
}

/// Reduce a statement to its structure: literals become `?` and value lists
/// collapse to `IN (?)`, so statements differing only in values compare equal.
pub fn normalize_sql(sql: &str) -> String {
    let Some(n) = normalizer() else {
        return sql.trim().to_string();
    };

    let sql = n.whitespace.replace_all(sql.trim(), " ");
    let sql = n.string_literal.replace_all(&sql, "?");
    let sql = n.numeric_literal.replace_all(&sql, "${1}?");
    n.in_list.replace_all(&sql, "${1} (?)").into_owned()
}

#[derive(Debug)]
struct PendingQuery {
    sql: String,
    bindings: Vec<Value>,
    started: Instant,
}

#[derive(Debug, Default)]
struct TrackerState {
    pending: Option<PendingQuery>,
    patterns: HashMap<String, usize>,
    sequence: usize,
}

/// Records executed statements into a unit's collector.
///
/// Cloning shares the same state, so driver adapters can each hold a handle.
#[derive(Debug, Clone)]
pub struct QueryTracker {
    state: Arc<Mutex<TrackerState>>,
    collector: SharedCollector,
    caller_filter: Option<fn(&RawFrame) -> bool>,
}

impl QueryTracker {
    pub fn new(collector: SharedCollector) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState::default())),
            collector,
            caller_filter: Some(is_application_frame),
        }
    }

    /// Skip stack walking for caller file/line
    pub fn without_caller_attribution(mut self) -> Self {
        self.caller_filter = None;
        self
    }

    /// Attribute each statement to the innermost frame accepted by `filter`
    pub fn with_caller_filter(mut self, filter: fn(&RawFrame) -> bool) -> Self {
        self.caller_filter = Some(filter);
        self
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn on_query_start(&self, sql: impl Into<String>, bindings: Vec<Value>) {
        self.state().pending = Some(PendingQuery {
            sql: sql.into(),
            bindings,
            started: Instant::now(),
        });
    }

    /// Record the statement opened by the last `on_query_start`; ignored if none is open
    pub fn on_query_end(&self) {
        let Some(pending) = self.state().pending.take() else {
            return;
        };

        self.record(pending.sql, pending.bindings, pending.started.elapsed());
    }

    /// Record a statement whose duration was measured by the caller
    pub fn record(&self, sql: impl Into<String>, bindings: Vec<Value>, duration: Duration) {
        if !self.collector.is_enabled() {
            return;
        }

        let sql = sql.into();
        let normalized_sql = normalize_sql(&sql);

        let (sequence, duplicate_count) = {
            let mut state = self.state();
            let sequence = state.sequence;
            state.sequence += 1;
            let count = state.patterns.entry(normalized_sql.clone()).or_insert(0);
            *count += 1;
            (sequence, *count)
        };

        let (file_path, line_number) = self
            .caller_filter
            .and_then(|filter| find_frame(filter))
            .map(|frame| (frame.file, frame.line))
            .unwrap_or((None, None));

        let record = QueryRecord {
            pattern_hash: sha256_hex(&normalized_sql),
            sql,
            bindings,
            normalized_sql,
            duration: round_to(duration.as_secs_f64() * 1000.0, 4),
            sequence,
            is_duplicate: duplicate_count > 1,
            duplicate_count,
            is_n1: false,
            n1_group_hash: None,
            file_path,
            line_number,
            occurred_at: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };

        self.collector.with(|collector| collector.add_query(record));
    }

    /// Flag every pattern executed more than [`N1_THRESHOLD`] times and mark
    /// its queries in the collector. Meant to run once, at unit end.
    pub fn detect_n1_groups(&self) -> Vec<N1Group> {
        let mut groups: Vec<N1Group> = self
            .state()
            .patterns
            .iter()
            .filter(|&(_, &count)| count > N1_THRESHOLD)
            .map(|(pattern, &count)| N1Group {
                pattern: pattern.clone(),
                count,
                hash: sha256_hex(pattern),
            })
            .collect();
        groups.sort_by(|a, b| a.pattern.cmp(&b.pattern));

        if !groups.is_empty() {
            self.collector.with(|collector| collector.flag_n1_groups(&groups));
        }

        groups
    }

    pub fn clear(&self) {
        *self.state() = TrackerState::default();
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
