use std::ops::Range;
use std::time::{
    Duration,
    Instant,
};

use async_trait::async_trait;
use similar::{
    Algorithm,
    DiffTag,
};
use tracing::debug;

use crate::consts::DIFF_MAX_COMPUTATION_TIME;
use crate::error::DiffError;

/// Extra time granted to the blocking worker on top of the diff deadline before the call is
/// considered hung.
const WORKER_SLACK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    pub ignore_trim_whitespace: bool,
    pub max_computation_time: Duration,
    pub compute_moves: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            ignore_trim_whitespace: true,
            max_computation_time: DIFF_MAX_COMPUTATION_TIME,
            compute_moves: false,
        }
    }
}

/// A 1-based, end-exclusive range of lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: usize,
    pub end_exclusive: usize,
}

impl LineRange {
    pub fn new(start: usize, end_exclusive: usize) -> Self {
        Self { start, end_exclusive }
    }

    pub fn len(&self) -> usize {
        self.end_exclusive.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn from_index_range(range: Range<usize>) -> Self {
        Self::new(range.start + 1, range.end + 1)
    }
}

/// One changed region: `original` lines were replaced by `modified` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRangeMapping {
    pub original: LineRange,
    pub modified: LineRange,
}

/// Line-oriented diffing.
#[async_trait]
pub trait DiffProvider: Send + Sync {
    async fn compute_diff(
        &self,
        original: &str,
        modified: &str,
        options: DiffOptions,
    ) -> Result<Vec<LineRangeMapping>, DiffError>;
}

/// [DiffProvider] backed by `similar`'s Myers implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarDiffProvider;

impl SimilarDiffProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DiffProvider for SimilarDiffProvider {
    async fn compute_diff(
        &self,
        original: &str,
        modified: &str,
        options: DiffOptions,
    ) -> Result<Vec<LineRangeMapping>, DiffError> {
        if options.compute_moves {
            debug!("move detection is not supported, diffing without it");
        }

        let original = original.to_owned();
        let modified = modified.to_owned();
        let budget = options.max_computation_time;
        let worker = tokio::task::spawn_blocking(move || {
            line_range_mappings(&original, &modified, options.ignore_trim_whitespace, budget)
        });

        match tokio::time::timeout(budget + WORKER_SLACK, worker).await {
            Ok(Ok(mappings)) => Ok(mappings),
            Ok(Err(err)) => Err(DiffError::Worker(err.to_string())),
            Err(_elapsed) => Err(DiffError::Timeout(budget)),
        }
    }
}

/// Diffs `original` against `modified` line by line and merges adjacent changes into mappings.
pub fn line_range_mappings(
    original: &str,
    modified: &str,
    ignore_trim_whitespace: bool,
    budget: Duration,
) -> Vec<LineRangeMapping> {
    let split = |text: &str| -> Vec<String> {
        text.lines()
            .map(|line| if ignore_trim_whitespace { line.trim() } else { line })
            .map(str::to_owned)
            .collect()
    };
    let old_lines = split(original);
    let new_lines = split(modified);

    let deadline = Instant::now().checked_add(budget);
    let ops = similar::capture_diff_slices_deadline(Algorithm::Myers, &old_lines, &new_lines, deadline);

    let mut mappings = Vec::new();
    let mut pending: Option<(Range<usize>, Range<usize>)> = None;
    for op in ops {
        let (tag, old, new) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            if let Some((old, new)) = pending.take() {
                mappings.push(LineRangeMapping {
                    original: LineRange::from_index_range(old),
                    modified: LineRange::from_index_range(new),
                });
            }
            continue;
        }
        pending = Some(match pending.take() {
            Some((prev_old, prev_new)) => (prev_old.start..old.end, prev_new.start..new.end),
            None => (old, new),
        });
    }
    if let Some((old, new)) = pending {
        mappings.push(LineRangeMapping {
            original: LineRange::from_index_range(old),
            modified: LineRange::from_index_range(new),
        });
    }

    mappings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mappings(original: &str, modified: &str) -> Vec<LineRangeMapping> {
        line_range_mappings(original, modified, true, DIFF_MAX_COMPUTATION_TIME)
    }

    #[test]
    fn test_identical_text_has_no_mappings() {
        assert!(mappings("a\nb\nc\n", "a\nb\nc\n").is_empty());
    }

    #[test]
    fn test_replacement_span() {
        let original = "1\n2\n3\n4\nfive\nsix\nseven\n8\n9\n";
        let modified = "1\n2\n3\n4\nreplacement\n8\n9\n";
        assert_eq!(mappings(original, modified), vec![LineRangeMapping {
            original: LineRange::new(5, 8),
            modified: LineRange::new(5, 6),
        }]);
    }

    #[test]
    fn test_insert_and_delete_spans() {
        let m = mappings("a\nb\nc\n", "a\nnew\nb\n");
        let removed: usize = m.iter().map(|m| m.original.len()).sum();
        let added: usize = m.iter().map(|m| m.modified.len()).sum();
        assert_eq!((added, removed), (1, 1));
        assert_eq!(m.len(), 2);
        assert!(m[0].original.is_empty());
        assert_eq!(m[0].modified, LineRange::new(2, 3));
        assert_eq!(m[1].original, LineRange::new(3, 4));
    }

    #[test]
    fn test_trim_whitespace_is_ignored() {
        assert!(mappings("fn a() {\n    x\n}\n", "fn a() {\n\tx   \n}\n").is_empty());
        assert_eq!(
            line_range_mappings("  x\n", "x\n", false, DIFF_MAX_COMPUTATION_TIME).len(),
            1
        );
    }

    #[tokio::test]
    async fn test_similar_provider() {
        let provider = SimilarDiffProvider::new();
        let result = provider
            .compute_diff("a\nb\n", "a\nc\nd\n", DiffOptions::default())
            .await
            .unwrap();
        assert_eq!(result, vec![LineRangeMapping {
            original: LineRange::new(2, 3),
            modified: LineRange::new(2, 4),
        }]);
    }
}
