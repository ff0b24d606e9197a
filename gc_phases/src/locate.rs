//! Boolean-run primitives shared by the segmenter and the phenotyper.
//!
//! Bounds are always inclusive-left, exclusive-right.

use std::ops::Range;

use tracing::warn;

/// Contiguous `true` runs of `mask`, left to right.
pub fn label_runs(mask: &[bool]) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;
    for (idx, &value) in mask.iter().enumerate() {
        match (value, start) {
            (true, None) => start = Some(idx),
            (false, Some(left)) => {
                runs.push(left..idx);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(left) = start {
        runs.push(left..mask.len());
    }
    runs
}

/// Bounds of the single `true` run of `filter`.
///
/// Returns `None` when the filter selects nothing, or when it selects more
/// than one disjoint run; the latter is logged since callers cannot proceed
/// on such a region.
pub fn locate_segment(filter: &[bool]) -> Option<(usize, usize)> {
    let runs = label_runs(filter);
    match runs.len() {
        0 => None,
        1 => Some((runs[0].start, runs[0].end)),
        n => {
            warn!("filter not homogeneous, contains {} segments", n);
            None
        }
    }
}

/// New filter of `size` that is `true` exactly on `[left, right)`.
///
/// `left` defaults to 0 and `right` to `size`.
pub fn build_filter(size: usize, left: Option<usize>, right: Option<usize>) -> Vec<bool> {
    let mut filter = vec![false; size];
    reset_filter(&mut filter, left, right);
    filter
}

/// Reuse `filter` in place, keeping its size.
pub fn reset_filter(filter: &mut [bool], left: Option<usize>, right: Option<usize>) {
    let size = filter.len();
    let right = right.unwrap_or(size).min(size);
    let left = left.unwrap_or(0).min(right);
    filter.fill(false);
    filter[left..right].fill(true);
}

/// Length-3 median filter over a boolean mask, zero padded at the ends.
///
/// Removes isolated `true` samples and fills isolated `false` gaps.
pub fn median3(mask: &[bool]) -> Vec<bool> {
    let n = mask.len();
    (0..n)
        .map(|i| {
            let before = i > 0 && mask[i - 1];
            let after = i + 1 < n && mask[i + 1];
            let votes = before as u8 + mask[i] as u8 + after as u8;
            votes >= 2
        })
        .collect()
}
