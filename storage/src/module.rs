use serde::{Deserialize, Serialize};

/// Comment that marks a script as an importable module.
pub const MODULE_MARKER: &str = "# microbit-module:";

/// How many leading lines are searched for [`MODULE_MARKER`].
const MARKER_LINES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    /// Stored under its own file name next to `main.py`.
    Module(String),
    /// Replaces the entry-point script.
    EntryScript,
}

impl Classification {
    pub fn is_module(&self) -> bool {
        matches!(self, Classification::Module(_))
    }
}

pub fn classify<'a, I>(filename: &str, first_lines: I) -> Classification
where
    I: IntoIterator<Item = &'a str>,
{
    let is_module = first_lines
        .into_iter()
        .take(MARKER_LINES)
        .any(|line| line.starts_with(MODULE_MARKER));

    if is_module {
        Classification::Module(filename.to_string())
    } else {
        Classification::EntryScript
    }
}

/// Splits `code` on `\n` or `\r\n` and classifies its first lines.
pub fn classify_source(filename: &str, code: &str) -> Classification {
    classify(filename, code.lines())
}
