//! Caller attribution for log records.
//!
//! The call stack is walked from the innermost frame outwards and the first
//! frame that is neither part of this crate's logging path nor excluded by
//! configuration is reported as `"<file>:<line> <module>::<function>"`.

use std::path::Path;

/// Frames that belong to the logging path itself or the runtime.
const INTERNAL_PREFIXES: &[&str] = &[
    "otelkit::log::",
    "backtrace::",
    "std::",
    "core::",
    "alloc::",
    "_Unwind",
];

/// Rules deciding which stack frames may be reported as the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerFilter {
    modules: Vec<String>,
    files: Vec<String>,
}

impl CallerFilter {
    /// `modules` are function path prefixes, in `a::b` or `a/b` form.
    /// `files` are substrings matched against the source file path.
    pub fn new<M, F>(modules: M, files: F) -> Self
    where
        M: IntoIterator,
        M::Item: AsRef<str>,
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        let modules = modules
            .into_iter()
            .map(|m| m.as_ref().trim().replace('/', "::"))
            .filter(|m| !m.is_empty())
            .collect();
        let files = files
            .into_iter()
            .map(|f| f.as_ref().trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        Self { modules, files }
    }

    /// Whether a frame must be skipped.
    pub fn skips(&self, function: &str, file: &str) -> bool {
        let function = function.trim_start_matches('<');
        INTERNAL_PREFIXES.iter().any(|p| function.starts_with(p))
            || self.modules.iter().any(|m| function.starts_with(m.as_str()))
            || self.files.iter().any(|f| file.contains(f.as_str()))
    }

    /// Location of the nearest frame that is not skipped.
    ///
    /// Returns `None` when no frame qualifies or symbols are unavailable.
    pub fn resolve(&self) -> Option<String> {
        let mut caller = None;
        backtrace::trace(|frame| {
            backtrace::resolve_frame(frame, |symbol| {
                if caller.is_some() {
                    return;
                }
                let (Some(name), Some(file), Some(line)) =
                    (symbol.name(), symbol.filename(), symbol.lineno())
                else {
                    return;
                };
                let function = format!("{name:#}");
                if self.skips(&function, &file.to_string_lossy()) {
                    return;
                }
                caller = Some(render(file, line, &function));
            });
            caller.is_none()
        });
        caller
    }
}

fn render(file: &Path, line: u32, function: &str) -> String {
    let file = file
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_else(|| file.to_string_lossy());
    format!("{file}:{line} {}", short_function(function))
}

/// Keep the enclosing module and the function name.
fn short_function(function: &str) -> &str {
    let function = function.trim_start_matches('<');
    match function.rmatch_indices("::").nth(1) {
        Some((idx, _)) => &function[idx + 2..],
        None => function,
    }
}
