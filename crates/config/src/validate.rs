//! Semantic validation of a loaded [`RelayConfig`].
//!
//! Parsing already rejects type errors; this pass reports combinations that
//! parse but cannot work at runtime.

use crate::schema::{PairMode, RelayConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "filter.keyword"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.path, self.message)
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate a loaded configuration.
#[must_use]
pub fn validate(config: &RelayConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    let id = config.session.id.trim();
    if id.is_empty() {
        result.push(Severity::Error, "session.id", "session id must not be empty");
    } else if id.contains(['/', '\\']) || id == "." || id == ".." {
        result.push(
            Severity::Error,
            "session.id",
            format!("session id '{id}' must be a single path segment"),
        );
    }

    if let Some(keyword) = &config.filter.keyword
        && let Err(e) = regex::RegexBuilder::new(keyword)
            .case_insensitive(true)
            .build()
    {
        result.push(
            Severity::Error,
            "filter.keyword",
            format!("invalid pattern: {e}"),
        );
    }

    for group in &config.filter.allowed_groups {
        if !group.ends_with("@g.us") {
            result.push(
                Severity::Warning,
                "filter.allowed_groups",
                format!("'{group}' is not a group id (expected an @g.us suffix)"),
            );
        }
    }

    if config.webhook.forward {
        match config.webhook.url.as_deref().map(str::trim) {
            None | Some("") => result.push(
                Severity::Warning,
                "webhook.url",
                "webhook forwarding is enabled but no url is set; only the durable store is written",
            ),
            Some(raw) => match url::Url::parse(raw) {
                Ok(u) if matches!(u.scheme(), "http" | "https") => {},
                Ok(u) => result.push(
                    Severity::Error,
                    "webhook.url",
                    format!("unsupported scheme '{}'", u.scheme()),
                ),
                Err(e) => result.push(Severity::Error, "webhook.url", format!("invalid url: {e}")),
            },
        }
    }
    if config.webhook.max_in_flight == 0 {
        result.push(
            Severity::Error,
            "webhook.max_in_flight",
            "must be at least 1",
        );
    }

    match url::Url::parse(&config.transport.sidecar_url) {
        Ok(u) if matches!(u.scheme(), "ws" | "wss") => {},
        Ok(u) => result.push(
            Severity::Error,
            "transport.sidecar_url",
            format!("expected ws:// or wss://, got '{}'", u.scheme()),
        ),
        Err(e) => result.push(
            Severity::Error,
            "transport.sidecar_url",
            format!("invalid url: {e}"),
        ),
    }

    if config.transport.pair_mode == PairMode::Code {
        let digits = config
            .transport
            .phone_number
            .as_deref()
            .map(|p| p.chars().filter(char::is_ascii_digit).count())
            .unwrap_or(0);
        if digits == 0 {
            result.push(
                Severity::Error,
                "transport.phone_number",
                "pair_mode \"code\" requires a phone number",
            );
        }
    }

    if config.transport.reconnect.base_delay_ms > config.transport.reconnect.max_delay_ms {
        result.push(
            Severity::Warning,
            "transport.reconnect",
            "base_delay_ms exceeds max_delay_ms; every retry waits max_delay_ms",
        );
    }

    for (path, secs) in [
        ("transport.handshake_timeout_secs", config.transport.handshake_timeout_secs),
        ("webhook.timeout_secs", config.webhook.timeout_secs),
        ("store.timeout_secs", config.store.timeout_secs),
    ] {
        if secs == 0 {
            result.push(Severity::Error, path, "must be at least 1 second");
        }
    }

    if config.pipeline.queue_capacity == 0 {
        result.push(
            Severity::Error,
            "pipeline.queue_capacity",
            "must be at least 1",
        );
    }

    if config.sidecar.auto_start && config.sidecar.dir.is_none() {
        result.push(
            Severity::Warning,
            "sidecar.dir",
            "auto_start without dir; the sidecar is searched in default locations",
        );
    }

    result
}
