//! Error fingerprinting and stack-trace enrichment

use crate::digest::sha256_hex;
use crate::frames::{capture_frames, is_dependency_path, RawFrame};
use apex_core::models::{
    CodeContext, ContextLine, ExceptionEnvironment, ExceptionRecord, StackFrame,
};
use chrono::Utc;
use std::panic::Location;
use std::path::{Path, PathBuf};

/// Lines of source shown before the error line
const CONTEXT_BEFORE: u32 = 10;
/// Lines of source shown after the error line
const CONTEXT_AFTER: u32 = 5;

/// An error as handed over by the host, before enrichment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedError {
    pub type_name: String,
    pub message: String,
    pub code: i64,
    /// Where the error was raised
    pub file: String,
    pub line: u32,
    /// Native frames, innermost first
    pub frames: Vec<RawFrame>,
}

impl CapturedError {
    pub fn new(
        type_name: impl Into<String>,
        message: impl Into<String>,
        file: impl Into<String>,
        line: u32,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            code: 0,
            file: file.into(),
            line,
            frames: Vec::new(),
        }
    }

    /// Capture an error value at the caller's location with the current stack.
    ///
    /// Rust errors carry no throw site, so the capture point stands in for it.
    #[track_caller]
    pub fn from_error<E>(error: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let location = Location::caller();
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            code: 0,
            file: location.file().to_string(),
            line: location.line(),
            frames: trim_collector_frames(capture_frames()),
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    pub fn with_frames(mut self, frames: Vec<RawFrame>) -> Self {
        self.frames = frames;
        self
    }
}

/// Owners of the frames a capture starts inside of
const MACHINERY_PREFIXES: &[&str] = &["std::", "core::", "alloc::", "backtrace::", "apex_telemetry"];

/// Drop the backtrace, panic and collector frames sitting on top of a capture
pub(crate) fn trim_collector_frames(frames: Vec<RawFrame>) -> Vec<RawFrame> {
    frames
        .into_iter()
        .skip_while(|frame| {
            let owner = frame
                .class
                .as_deref()
                .unwrap_or_default()
                .trim_start_matches('<');
            let function = frame.function.as_deref().unwrap_or_default();

            MACHINERY_PREFIXES.iter().any(|prefix| owner.starts_with(prefix))
                || function.starts_with("rust_begin_unwind")
                || function.starts_with("__rust")
        })
        .collect()
}

/// Turns captured errors into structured, hashed, source-annotated records.
///
/// Enrichment never fails: unreadable sources yield frames without context.
#[derive(Debug, Clone)]
pub struct ExceptionEnricher {
    base_path: Option<PathBuf>,
    environment: String,
}

impl Default for ExceptionEnricher {
    fn default() -> Self {
        Self::new()
    }
}

impl ExceptionEnricher {
    /// Enricher rooted at the working directory, environment from `APP_ENV`
    pub fn new() -> Self {
        Self {
            base_path: std::env::current_dir().ok(),
            environment: std::env::var("APP_ENV").unwrap_or_else(|_| "prod".to_string()),
        }
    }

    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Grouping hash: same type at the same location always hashes the same
    pub fn fingerprint(file: &str, line: u32, type_name: &str) -> String {
        sha256_hex(&format!("{}:{}:{}", file, line, type_name))
    }

    pub fn enrich(&self, error: &CapturedError) -> ExceptionRecord {
        let first = error.frames.first();
        let throw_site = RawFrame {
            file: Some(error.file.clone()),
            line: Some(error.line),
            function: Some(
                first
                    .and_then(|frame| frame.function.clone())
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
            class: Some(
                first
                    .and_then(|frame| frame.class.clone())
                    .unwrap_or_default(),
            ),
            args: Vec::new(),
        };

        let frames = std::iter::once(&throw_site).chain(error.frames.iter());

        ExceptionRecord {
            hash: Self::fingerprint(&error.file, error.line, &error.type_name),
            message: error.message.clone(),
            type_name: error.type_name.clone(),
            file_path: self.relative_path(&error.file),
            line_number: error.line,
            code: error.code,
            stack_trace: self.prepare_stack_trace(frames),
            timestamp: Utc::now().to_rfc3339(),
            context: ExceptionEnvironment {
                environment: self.environment.clone(),
                collector_version: env!("CARGO_PKG_VERSION").to_string(),
                os: std::env::consts::OS.to_string(),
            },
        }
    }

    fn prepare_stack_trace<'a>(
        &self,
        frames: impl Iterator<Item = &'a RawFrame>,
    ) -> Vec<StackFrame> {
        frames
            .filter_map(|frame| {
                let file = frame.file.as_deref()?;
                let line = frame.line.unwrap_or(0);

                // Argument values never leave the process
                Some(StackFrame {
                    file: self.relative_path(file),
                    line,
                    function: frame.function.clone().unwrap_or_default(),
                    class: frame.class.clone().unwrap_or_default(),
                    in_app: !is_dependency_path(file),
                    code_context: self.extract_code_context(file, line),
                })
            })
            .collect()
    }

    fn relative_path(&self, file: &str) -> String {
        let Some(base) = self.base_path.as_deref() else {
            return file.to_string();
        };

        Path::new(file)
            .strip_prefix(base)
            .map(|relative| relative.to_string_lossy().into_owned())
            .unwrap_or_else(|_| file.to_string())
    }

    fn extract_code_context(&self, file: &str, line: u32) -> Option<CodeContext> {
        let path = Path::new(file);
        let path = match (&self.base_path, path.is_relative()) {
            (Some(base), true) => base.join(path),
            _ => path.to_path_buf(),
        };

        let content = std::fs::read_to_string(&path).ok()?;
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return None;
        }

        let start = line.saturating_sub(CONTEXT_BEFORE).max(1);
        let end = (line.saturating_add(CONTEXT_AFTER)).min(lines.len() as u32);
        if start > end {
            return None;
        }

        let context = (start..=end)
            .map(|number| {
                let code = lines
                    .get(number as usize - 1)
                    .copied()
                    .unwrap_or_default();
                ContextLine {
                    line_number: number,
                    code: escape_whitespace(code),
                    is_error_line: number == line,
                }
            })
            .collect();

        Some(CodeContext {
            lines: context,
            context_start: start,
            context_end: end,
        })
    }
}

/// Keep indentation intact through HTML rendering downstream
fn escape_whitespace(code: &str) -> String {
    code.replace('\t', "&#9;").replace(' ', "&#32;")
}
