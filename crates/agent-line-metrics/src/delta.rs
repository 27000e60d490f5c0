use std::sync::Arc;

use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

use crate::diff::{
    DiffOptions,
    DiffProvider,
};
use crate::document::FileId;
use crate::error::{
    DeltaError,
    DiffError,
};
use crate::snapshot::Stabilizer;

/// Added and removed line counts between two texts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDelta {
    pub added: usize,
    pub removed: usize,
}

impl LineDelta {
    pub fn new(added: usize, removed: usize) -> Self {
        Self { added, removed }
    }

    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Line delta for one file, ready to be accumulated or emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDelta {
    pub file_name: String,
    pub language_id: String,
    pub lines_added: usize,
    pub lines_removed: usize,
}

impl FileDelta {
    pub fn new(file_name: impl Into<String>, language_id: impl Into<String>, delta: LineDelta) -> Self {
        Self {
            file_name: file_name.into(),
            language_id: language_id.into(),
            lines_added: delta.added,
            lines_removed: delta.removed,
        }
    }

    pub fn delta(&self) -> LineDelta {
        LineDelta::new(self.lines_added, self.lines_removed)
    }
}

/// Number of lines in `text`. A trailing line break does not start another line.
pub fn count_lines(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let segments = text.split('\n').count();
    if text.ends_with('\n') { segments - 1 } else { segments }
}

/// Computes the line delta between `original` and `modified`.
///
/// Creation and deletion are counted directly, everything else goes through `diff`.
pub async fn compute_delta(
    original: &str,
    modified: &str,
    diff: &dyn DiffProvider,
    options: DiffOptions,
) -> Result<LineDelta, DiffError> {
    match (original.is_empty(), modified.is_empty()) {
        (true, true) => return Ok(LineDelta::default()),
        (true, false) => return Ok(LineDelta::new(count_lines(modified), 0)),
        (false, true) => return Ok(LineDelta::new(0, count_lines(original))),
        (false, false) if original == modified => return Ok(LineDelta::default()),
        (false, false) => {},
    }

    let mappings = diff.compute_diff(original, modified, options).await?;
    Ok(mappings.iter().fold(LineDelta::default(), |acc, mapping| LineDelta {
        added: acc.added + mapping.modified.len(),
        removed: acc.removed + mapping.original.len(),
    }))
}

/// Computes per-file deltas against the settled contents of a document.
#[derive(Clone)]
pub struct DeltaComputer {
    stabilizer: Stabilizer,
    diff: Arc<dyn DiffProvider>,
    options: DiffOptions,
}

impl DeltaComputer {
    pub fn new(stabilizer: Stabilizer, diff: Arc<dyn DiffProvider>, options: DiffOptions) -> Self {
        Self {
            stabilizer,
            diff,
            options,
        }
    }

    /// Delta between `original` and the stable contents of `file`, or `None` if nothing changed.
    ///
    /// If the file can no longer be read or diffed, a non-empty original is counted as fully
    /// removed.
    pub async fn compute_file_delta(&self, file: &FileId, original: &str) -> Option<FileDelta> {
        let delta = match self.try_compute(file, original).await {
            Ok(delta) => delta,
            Err(err) if !original.is_empty() => {
                debug!(%file, %err, "delta computation failed, counting the original as removed");
                FileDelta::new(
                    file.file_name(),
                    language_for_path(file),
                    LineDelta::new(0, count_lines(original)),
                )
            },
            Err(err) => {
                debug!(%file, %err, "delta computation failed");
                return None;
            },
        };

        (!delta.delta().is_empty()).then_some(delta)
    }

    async fn try_compute(&self, file: &FileId, original: &str) -> Result<FileDelta, DeltaError> {
        let snapshot = self.stabilizer.stable_snapshot(file).await?;
        let delta = compute_delta(original, &snapshot.text, self.diff.as_ref(), self.options).await?;
        Ok(FileDelta::new(file.file_name(), snapshot.language_id, delta))
    }
}

/// Language id inferred from a file extension. Only used where no live document metadata is
/// available.
pub fn language_for_path(file: &FileId) -> &'static str {
    let Some(ext) = file.extension() else {
        return "plaintext";
    };
    match ext.as_str() {
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "py" | "pyi" => "python",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "cs" => "csharp",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "m" => "objective-c",
        "swift" => "swift",
        "rb" => "ruby",
        "php" => "php",
        "lua" => "lua",
        "r" => "r",
        "dart" => "dart",
        "sh" | "bash" | "zsh" => "shellscript",
        "ps1" => "powershell",
        "sql" => "sql",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "less" => "less",
        "vue" => "vue",
        "json" => "json",
        "jsonc" => "jsonc",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        "md" | "markdown" => "markdown",
        _ => "plaintext",
    }
}
