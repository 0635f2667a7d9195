//! Error reporting and diagnostics for XL.
//!
//! This crate provides structured diagnostics with source location tracking,
//! message templates with positional `$n` arguments, nested error-collection
//! scopes for speculative analysis, and a source map that turns byte offsets
//! into `file:line` positions.
//!
//! Diagnostics are created by other crates (`xl-infer`, `xl-codegen`) and
//! rendered here for display.

use std::fmt;

// ---------------------------------------------------------------------------
// Diagnostic categories
// ---------------------------------------------------------------------------

/// Broad category for diagnostics. Used for filtering and grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Two type terms cannot be reconciled.
    TypeMismatch,
    /// A call-shaped node matched no declared rewrite.
    NoFormMatches,
    /// The left-hand side of a rewrite is not a usable pattern.
    MalformedPattern,
    /// A type/value combination the matcher does not support yet.
    Unimplemented,
    /// Every guard of a call site failed at run time.
    FormMismatch,
    /// Nested candidate analysis went too deep.
    RecursionLimit,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::TypeMismatch,
        Category::NoFormMatches,
        Category::MalformedPattern,
        Category::Unimplemented,
        Category::FormMismatch,
        Category::RecursionLimit,
    ];

    pub fn all() -> &'static [Category] {
        &Self::ALL
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::TypeMismatch => "type_mismatch",
            Category::NoFormMatches => "no_form_matches",
            Category::MalformedPattern => "malformed_pattern",
            Category::Unimplemented => "unimplemented",
            Category::FormMismatch => "form_mismatch",
            Category::RecursionLimit => "recursion_limit",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Category::TypeMismatch => "E0001",
            Category::NoFormMatches => "E0002",
            Category::MalformedPattern => "E0003",
            Category::Unimplemented => "E0004",
            Category::FormMismatch => "E0005",
            Category::RecursionLimit => "E0006",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Category::TypeMismatch => "Expression type does not match expected type.",
            Category::NoFormMatches => "No declared rewrite has a pattern matching this form.",
            Category::MalformedPattern => "A rewrite declaration has an invalid pattern.",
            Category::Unimplemented => "This type/value combination is not supported yet.",
            Category::FormMismatch => "No candidate guard held when the call was reduced.",
            Category::RecursionLimit => "Rewrite candidates nest deeper than allowed.",
        }
    }

    pub fn example_fix(self) -> &'static str {
        match self {
            Category::TypeMismatch => {
                "Adjust the expression or add a conversion to match expected type."
            }
            Category::NoFormMatches => "Declare a rewrite for this form or fix the spelling.",
            Category::MalformedPattern => "Start the pattern with a name, operator or block.",
            Category::Unimplemented => "Use a named type or a literal instead.",
            Category::FormMismatch => "Add a fallback rewrite with a more general pattern.",
            Category::RecursionLimit => "Raise the nesting limit or make the recursion explicit.",
        }
    }
}

// ---------------------------------------------------------------------------
// Source locations (independent of xl-ast's Span)
// ---------------------------------------------------------------------------

/// A source location for diagnostics.
///
/// Uses byte offsets. Callers convert from `xl-ast` spans to this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file_id: u32,
    pub start: u32,
    pub end: u32,
}

impl SourceLocation {
    pub const UNKNOWN: SourceLocation = SourceLocation {
        file_id: u32::MAX,
        start: 0,
        end: 0,
    };

    pub const COMMAND_LINE: SourceLocation = SourceLocation {
        file_id: u32::MAX - 1,
        start: 0,
        end: 0,
    };
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic message.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Stable diagnostic code (e.g. E0001).
    pub code: &'static str,
    pub category: Category,
    /// Primary message: what went wrong.
    pub message: String,
    /// Where it went wrong.
    pub location: Option<SourceLocation>,
    /// Related spans, e.g. the other side of a failed unification.
    pub labels: Vec<DiagLabel>,
    /// Suggested fix, if any.
    pub help: Option<String>,
}

/// A labeled source span within a diagnostic.
#[derive(Debug, Clone)]
pub struct DiagLabel {
    pub location: SourceLocation,
    pub message: String,
}

/// Positional argument of a message template.
#[derive(Debug, Clone)]
pub enum ErrorArg {
    /// A tree, given by its canonical rendering and position.
    Tree {
        text: String,
        location: SourceLocation,
    },
    Text(String),
    Int(i64),
}

impl ErrorArg {
    pub fn tree(text: impl Into<String>, location: SourceLocation) -> Self {
        ErrorArg::Tree {
            text: text.into(),
            location,
        }
    }

    fn render(&self) -> String {
        match self {
            ErrorArg::Tree { text, .. } => format_tree_for_error(text),
            ErrorArg::Text(text) => text.clone(),
            ErrorArg::Int(value) => value.to_string(),
        }
    }
}

impl Diagnostic {
    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self {
            code: category.code(),
            category,
            message: message.into(),
            location: None,
            labels: Vec::new(),
            help: None,
        }
    }

    /// Error from a `$1`, `$2`, ... template. The first tree argument, if
    /// any, supplies the position.
    pub fn from_template(category: Category, template: &str, args: &[ErrorArg]) -> Self {
        let diag = Self::error(category, substitute(template, args));
        let location = args.iter().find_map(|arg| match arg {
            ErrorArg::Tree { location, .. } => Some(*location),
            _ => None,
        });
        match location {
            Some(location) => diag.at(location),
            None => diag,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_label(mut self, location: SourceLocation, message: impl Into<String>) -> Self {
        self.labels.push(DiagLabel {
            location,
            message: message.into(),
        });
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error[{}]: {}", self.code, self.message)?;
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

/// Replace `$n` with the rendering of the n-th (1-based) argument.
///
/// Placeholders without a matching argument are left as written.
pub fn substitute(template: &str, args: &[ErrorArg]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut digits = String::new();
        while let Some(&(_, d)) = chars.peek()
            && d.is_ascii_digit()
        {
            digits.push(d);
            chars.next();
        }
        match digits.parse::<usize>() {
            Ok(n) if n >= 1 && n <= args.len() => out.push_str(&args[n - 1].render()),
            _ => {
                out.push('$');
                out.push_str(&digits);
            }
        }
    }
    out
}

/// Longest rendering shown unabridged is this plus the `...` marker.
const MAX_TREE_TEXT: usize = 30;

/// Shorten a rendered tree for inclusion in a message.
///
/// Lines between the first and last newline collapse to `...`; anything
/// still longer than 33 characters keeps its first and last 15 characters.
pub fn format_tree_for_error(rendered: &str) -> String {
    let mut text = match (rendered.find('\n'), rendered.rfind('\n')) {
        (Some(first), Some(last)) => {
            format!("{}...{}", &rendered[..first], &rendered[last + 1..])
        }
        _ => rendered.to_string(),
    };
    let chars: Vec<char> = text.chars().collect();
    if chars.len() > MAX_TREE_TEXT + 3 {
        let half = MAX_TREE_TEXT / 2;
        let head: String = chars[..half].iter().collect();
        let tail: String = chars[chars.len() - half..].iter().collect();
        text = format!("{head}...{tail}");
    }
    format!("'{text}'")
}

// ---------------------------------------------------------------------------
// Nested error-collection scopes
// ---------------------------------------------------------------------------

/// Token returned by [`ErrorLog::begin_scope`]; must be closed in stack order.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an error scope must be closed with end_scope"]
pub struct ErrorScope(usize);

/// Stack of error-collection scopes.
///
/// The bottom scope is the session's output. A nested scope collects the
/// diagnostics of a speculative analysis; closing it either folds them into
/// the parent or hands them back to the caller.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    scopes: Vec<Vec<Diagnostic>>,
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorLog {
    pub fn new() -> Self {
        Self {
            scopes: vec![Vec::new()],
        }
    }

    pub fn push(&mut self, diag: Diagnostic) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(diag);
        }
    }

    pub fn extend(&mut self, diags: impl IntoIterator<Item = Diagnostic>) {
        for diag in diags {
            self.push(diag);
        }
    }

    pub fn begin_scope(&mut self) -> ErrorScope {
        self.scopes.push(Vec::new());
        ErrorScope(self.scopes.len() - 1)
    }

    /// Close `scope`. Committed diagnostics move to the parent scope and an
    /// empty list is returned; otherwise the scope's diagnostics are returned
    /// to the caller and the parent is left untouched.
    pub fn end_scope(&mut self, scope: ErrorScope, commit: bool) -> Vec<Diagnostic> {
        debug_assert_eq!(
            scope.0,
            self.scopes.len() - 1,
            "error scopes closed out of order"
        );
        if scope.0 == 0 || scope.0 >= self.scopes.len() {
            return Vec::new();
        }
        let pending = self.scopes.pop().unwrap_or_default();
        if commit {
            self.extend(pending);
            Vec::new()
        } else {
            pending
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    /// Diagnostics of the innermost scope.
    pub fn errors(&self) -> &[Diagnostic] {
        self.scopes.last().map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of diagnostics in the innermost scope.
    pub fn count(&self) -> usize {
        self.errors().len()
    }

    pub fn has_errors(&self) -> bool {
        self.count() > 0
    }

    /// Drain the bottom scope. Nested scopes must already be closed.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        debug_assert_eq!(self.depth(), 0, "take() with open error scopes");
        std::mem::take(&mut self.scopes[0])
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

/// Human-readable position of a source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionInfo {
    pub file: String,
    /// 1-based.
    pub line: u32,
    /// 1-based, in characters.
    pub column: u32,
    /// Text of the line containing the location.
    pub source: String,
}

#[derive(Debug, Clone)]
struct SourceFile {
    name: String,
    text: String,
    line_starts: Vec<usize>,
}

/// Source map for the files of a session.
#[derive(Debug, Clone, Default)]
pub struct Positions {
    files: Vec<SourceFile>,
}

impl Positions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file and return its id.
    pub fn add_file(&mut self, name: impl Into<String>, text: impl Into<String>) -> u32 {
        let text = text.into();
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        self.files.push(SourceFile {
            name: name.into(),
            text,
            line_starts,
        });
        (self.files.len() - 1) as u32
    }

    pub fn info(&self, location: SourceLocation) -> Option<PositionInfo> {
        let file = self.files.get(location.file_id as usize)?;
        let offset = (location.start as usize).min(file.text.len());
        let line_index = match file.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let line_start = file.line_starts[line_index];
        let line_end = file.text[line_start..]
            .find('\n')
            .map_or(file.text.len(), |n| line_start + n);
        let column = file.text.get(line_start..offset)?.chars().count() + 1;
        Some(PositionInfo {
            file: file.name.clone(),
            line: line_index as u32 + 1,
            column: column as u32,
            source: file.text[line_start..line_end].to_string(),
        })
    }

    /// `file:line`, or a fixed marker for the reserved locations.
    pub fn describe(&self, location: Option<SourceLocation>) -> String {
        match location {
            Some(loc) if loc.file_id == SourceLocation::COMMAND_LINE.file_id => {
                "<Command line>".to_string()
            }
            Some(loc) => match self.info(loc) {
                Some(info) => format!("{}:{}", info.file, info.line),
                None => "<Unknown position>".to_string(),
            },
            None => "<Unknown position>".to_string(),
        }
    }

    /// The message at its position, then one line per label.
    pub fn render(&self, diag: &Diagnostic) -> String {
        let mut out = format!("{}: {}", self.describe(diag.location), diag.message);
        for label in &diag.labels {
            out.push_str(&format!(
                "\n  {}: {}",
                self.describe(Some(label.location)),
                label.message
            ));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Error type for crates that produce diagnostics
// ---------------------------------------------------------------------------

/// Error type wrapping one or more diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", .0.first().map(|d| d.to_string()).unwrap_or_default())]
pub struct DiagnosticError(pub Vec<Diagnostic>);

impl DiagnosticError {
    pub fn single(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }

    pub fn multiple(diags: Vec<Diagnostic>) -> Self {
        Self(diags)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.0
    }
}
