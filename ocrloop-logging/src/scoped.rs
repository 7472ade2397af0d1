//! Hierarchical logger names

use std::fmt;

/// A dot-joined logger name, e.g. `MedianService.PluginMedianClient`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ScopedName {
    segments: Vec<String>,
}

impl ScopedName {
    /// Create a name with a single segment
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    /// Derive a child name; empty segments are ignored
    pub fn child(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        let mut segments = self.segments.clone();
        if !name.is_empty() {
            segments.push(name);
        }
        Self { segments }
    }

    /// Last segment of the name
    pub fn leaf(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// Span carrying this name as its `logger` field
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!("ocrloop", logger = %self)
    }
}

impl fmt::Display for ScopedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}
