//! Merging of streamed fragments into the log buffer.
//!
//! gallery-dl re-emits its download progress line over and over instead of
//! appending. The only way to tell such a line apart is the throughput suffix
//! it carries, so classification lives in [`ProgressClassifier`] and the merge
//! rules below never look at line contents directly.

use crate::buffer::{LogBuffer, ProgressCursor, split_fragments};

pub const DEFAULT_PROGRESS_MARKER: &str = "B/s";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressClassifier {
    marker: String,
}

impl ProgressClassifier {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn is_progress(&self, line: &str) -> bool {
        line.contains(self.marker.as_str())
    }
}

impl Default for ProgressClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_MARKER)
    }
}

/// What a merge did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Index rewritten in place, if the batch continued a progress line.
    pub replaced: Option<usize>,
    /// Number of lines pushed onto the end of the buffer.
    pub appended: usize,
    pub cursor_changed: bool,
    /// False only for a lone in-place progress tick.
    pub scroll: bool,
}

/// Merge one message worth of text into `buffer`.
///
/// Returns `None` when the batch holds no non-empty fragment.
pub fn merge_batch(
    buffer: &mut LogBuffer,
    cursor: &mut ProgressCursor,
    batch: &str,
    classifier: &ProgressClassifier,
) -> Option<MergeOutcome> {
    let mut fragments: Vec<&str> = split_fragments(batch).collect();
    if fragments.is_empty() {
        return None;
    }
    collapse_leading_progress(&mut fragments, classifier);

    let before = *cursor;
    let reference = cursor.index().or_else(|| buffer.last_index());
    let reference_is_progress = reference
        .and_then(|index| buffer.get(index))
        .is_some_and(|line| classifier.is_progress(line));
    let incoming_is_progress = classifier.is_progress(fragments[0]);

    let mut replaced = None;
    let mut rest = fragments.as_slice();
    match (reference_is_progress, incoming_is_progress, reference) {
        (true, true, Some(index)) => {
            cursor.set(index);
            buffer.overwrite(index, fragments[0].to_owned());
            replaced = Some(index);
            rest = &fragments[1..];
        }
        (true, false, _) => cursor.clear(),
        _ => {}
    }

    for fragment in rest {
        buffer.push((*fragment).to_owned());
    }

    Some(MergeOutcome {
        replaced,
        appended: rest.len(),
        cursor_changed: before != *cursor,
        scroll: replaced.is_none() || !rest.is_empty(),
    })
}

/// Within one batch only the first of a leading run of progress ticks is
/// kept; the ones right behind it are already stale.
fn collapse_leading_progress(fragments: &mut Vec<&str>, classifier: &ProgressClassifier) {
    if fragments.len() < 2
        || !classifier.is_progress(fragments[0])
        || !classifier.is_progress(fragments[1])
    {
        return;
    }
    let run_end = fragments[1..]
        .iter()
        .position(|fragment| !classifier.is_progress(fragment))
        .map_or(fragments.len(), |offset| offset + 1);
    fragments.drain(1..run_end);
}
