//! Path eligibility and event filters

use apex_core::config::PathFilterConfig;
use regex::Regex;
use tracing::{Metadata, Subscriber};
use tracing_subscriber::layer::{Context, Filter};

/// Crate prefix of the collector's own diagnostics
pub const OWN_TARGET: &str = "apex_telemetry";

/// Whether an event target belongs to the collector itself
pub fn is_own_target(target: &str) -> bool {
    target.starts_with(OWN_TARGET)
}

/// Include/exclude glob rules deciding which request paths are captured.
///
/// A path is eligible when it matches no exclude pattern and at least one
/// include pattern. Patterns follow `fnmatch`: `*` matches any run of
/// characters (slashes included), `?` a single character, `[...]` one character
/// from a class. A leading slash on the path is ignored.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl PathFilter {
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Self {
            include: include.into_iter().filter_map(|p| glob_to_regex(p.as_ref())).collect(),
            exclude: exclude.into_iter().filter_map(|p| glob_to_regex(p.as_ref())).collect(),
        }
    }

    pub fn from_config(config: &PathFilterConfig) -> Self {
        Self::new(&config.include, &config.exclude)
    }

    pub fn is_eligible(&self, path: &str) -> bool {
        let path = path.trim_start_matches('/');

        if self.exclude.iter().any(|re| re.is_match(path)) {
            return false;
        }

        self.include.iter().any(|re| re.is_match(path))
    }
}

fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let chars: Vec<char> = pattern.trim_start_matches('/').chars().collect();
    let mut source = String::with_capacity(chars.len() + 8);
    source.push('^');

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            '[' => match bracket_class(&chars[i + 1..]) {
                Some((class, consumed)) => {
                    source.push_str(&class);
                    i += consumed;
                }
                None => source.push_str(r"\["),
            },
            other => source.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    source.push('$');
    Regex::new(&source).ok()
}

/// Translate the inside of a `[...]` class (`!` or `^` negates, `-` forms
/// ranges, a leading `]` is literal). Returns the regex class and the number of
/// characters consumed through the closing bracket; `None` if it never closes.
fn bracket_class(rest: &[char]) -> Option<(String, usize)> {
    let mut class = String::from("[");
    let mut i = 0;
    if matches!(rest.first(), Some('!') | Some('^')) {
        class.push('^');
        i += 1;
    }

    let body_start = i;
    loop {
        let c = *rest.get(i)?;
        if c == ']' && i > body_start {
            break;
        }
        match c {
            '-' => class.push('-'),
            other => class.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    class.push(']');
    Some((class, i + 1))
}

/// Filter that keeps the collector's own events out of log capture
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnEventsFilter;

impl OwnEventsFilter {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Filter<S> for OwnEventsFilter
where
    S: Subscriber,
{
    fn enabled(&self, meta: &Metadata<'_>, _ctx: &Context<'_, S>) -> bool {
        !is_own_target(meta.target())
    }

    fn callsite_enabled(&self, meta: &'static Metadata<'static>) -> tracing::subscriber::Interest {
        if is_own_target(meta.target()) {
            tracing::subscriber::Interest::never()
        } else {
            tracing::subscriber::Interest::sometimes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_include_matches_api_paths() {
        let filter = PathFilter::new(["api/*"], Vec::<String>::new());

        assert!(filter.is_eligible("api/users"));
        assert!(filter.is_eligible("/api/users"));
        assert!(filter.is_eligible("api/users/7/posts"));
        assert!(!filter.is_eligible("web/home"));
        assert!(!filter.is_eligible("api"));
    }

    #[test]
    fn test_wildcard_with_exclusion() {
        let filter = PathFilter::new(["*"], ["api/health"]);

        assert!(!filter.is_eligible("api/health"));
        assert!(!filter.is_eligible("/api/health"));
        assert!(filter.is_eligible("api/users"));
        assert!(filter.is_eligible("web/home"));
        assert!(filter.is_eligible(""));
    }

    #[test]
    fn test_exclude_wins() {
        let filter = PathFilter::new(["api/*"], ["api/internal/*"]);

        assert!(filter.is_eligible("api/public"));
        assert!(!filter.is_eligible("api/internal/metrics"));
    }

    #[test]
    fn test_pattern_metacharacters_are_literal() {
        let filter = PathFilter::new(["api/v1.0/*"], Vec::<String>::new());

        assert!(filter.is_eligible("api/v1.0/users"));
        assert!(!filter.is_eligible("api/v1x0/users"));
    }

    #[test]
    fn test_bracket_classes() {
        let filter = PathFilter::new(["api/v[12]/*", "hooks/[!_]*", "files/[a-c]?"], Vec::<String>::new());

        assert!(filter.is_eligible("api/v1/users"));
        assert!(filter.is_eligible("api/v2/users"));
        assert!(!filter.is_eligible("api/v3/users"));
        assert!(filter.is_eligible("hooks/stripe"));
        assert!(!filter.is_eligible("hooks/_internal"));
        assert!(filter.is_eligible("files/b7"));
        assert!(!filter.is_eligible("files/d7"));
    }

    #[test]
    fn test_unclosed_bracket_is_literal() {
        let filter = PathFilter::new(["api/[v1"], Vec::<String>::new());

        assert!(filter.is_eligible("api/[v1"));
        assert!(!filter.is_eligible("api/v1"));
    }

    #[test]
    fn test_empty_include_matches_nothing() {
        let filter = PathFilter::new(Vec::<String>::new(), Vec::<String>::new());
        assert!(!filter.is_eligible("api/users"));
    }

    #[test]
    fn test_from_config_defaults() {
        let filter = PathFilter::from_config(&PathFilterConfig::default());
        assert!(filter.is_eligible("/api/orders"));
        assert!(!filter.is_eligible("/dashboard"));
    }

    #[test]
    fn test_own_targets() {
        assert!(is_own_target("apex_telemetry::transport"));
        assert!(!is_own_target("my_app::handlers"));
    }
}
