//! Stack frame capture and classification

/// Path segments that mark third-party or toolchain code
pub const DEPENDENCY_MARKERS: &[&str] = &[
    "/vendor/",
    "/.cargo/registry/",
    "/.cargo/git/",
    "/rustc/",
    "/library/std/",
    "/library/core/",
    "/library/alloc/",
];

/// A native stack frame before enrichment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
    pub class: Option<String>,
    /// Argument values, when the host can supply them; never shipped
    pub args: Vec<String>,
}

impl RawFrame {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: Some(file.into()),
            line: Some(line),
            ..Self::default()
        }
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Build a frame from a demangled symbol such as `app::users::Repo::load`
    fn from_symbol(symbol: &str) -> Self {
        let (class, function) = split_symbol(symbol);
        Self {
            function: Some(function),
            class: if class.is_empty() { None } else { Some(class) },
            ..Self::default()
        }
    }
}

/// Whether a path points into dependency or toolchain sources
pub fn is_dependency_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    DEPENDENCY_MARKERS
        .iter()
        .any(|marker| normalized.contains(marker))
}

/// Owners of frames that belong to stack walking or to this crate
const COLLECTOR_OWNERS: &[&str] = &["apex_telemetry", "backtrace::", "std::"];

/// Whether a frame belongs to the monitored application
pub fn is_application_frame(frame: &RawFrame) -> bool {
    let Some(file) = frame.file.as_deref() else {
        return false;
    };
    if is_dependency_path(file) {
        return false;
    }
    let owner = frame
        .class
        .as_deref()
        .unwrap_or_default()
        .trim_start_matches('<');
    !COLLECTOR_OWNERS.iter().any(|prefix| owner.starts_with(prefix))
}

/// Capture the current thread's stack, innermost frame first
pub fn capture_frames() -> Vec<RawFrame> {
    let mut frames = Vec::new();
    backtrace::trace(|frame| {
        frames.extend(resolve(frame));
        true
    });
    frames
}

/// Walk the stack from the innermost frame and stop at the first frame
/// accepted by `accept`; frames past it are never symbolized
pub fn find_frame(accept: impl Fn(&RawFrame) -> bool) -> Option<RawFrame> {
    let mut found = None;
    backtrace::trace(|frame| {
        found = resolve(frame).into_iter().find(|raw| accept(raw));
        found.is_none()
    });
    found
}

/// Innermost application frame of the current stack
pub fn find_caller() -> Option<RawFrame> {
    find_frame(is_application_frame)
}

/// Symbolize one frame; inlined calls yield several entries
fn resolve(frame: &backtrace::Frame) -> Vec<RawFrame> {
    let mut resolved = Vec::new();
    backtrace::resolve_frame(frame, |symbol| {
        let mut raw = symbol
            .name()
            .map(|name| RawFrame::from_symbol(&format!("{:#}", name)))
            .unwrap_or_default();
        raw.file = symbol
            .filename()
            .map(|path| path.to_string_lossy().into_owned());
        raw.line = symbol.lineno();
        resolved.push(raw);
    });
    resolved
}

/// Split a symbol into its owning path and function name.
///
/// `<app::Repo as app::Load>::load::h0123456789abcdef` becomes
/// (`<app::Repo as app::Load>`, `load`).
fn split_symbol(symbol: &str) -> (String, String) {
    let symbol = strip_hash(symbol);
    let mut depth = 0i32;
    let mut split_at = None;
    let bytes = symbol.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'<' => depth += 1,
            b'>' => depth -= 1,
            b':' if depth == 0 && i + 1 < bytes.len() && bytes[i + 1] == b':' => {
                split_at = Some(i);
            }
            _ => {}
        }
    }

    match split_at {
        Some(i) if i > 0 && symbol.as_bytes()[i - 1] != b':' => {
            (symbol[..i].to_string(), symbol[i + 2..].to_string())
        }
        _ => (String::new(), symbol.to_string()),
    }
}

fn strip_hash(symbol: &str) -> &str {
    match symbol.rfind("::h") {
        Some(pos)
            if symbol.len() - pos == 19
                && symbol[pos + 3..].chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            &symbol[..pos]
        }
        _ => symbol,
    }
}
