//! Work partitioning across the worker pool
//!
//! Pure functions that decide which sentences each worker owns. Fresh runs
//! split the whole unit space into balanced contiguous ranges; resume runs
//! split the list of missing indices instead, which may be scattered
//! arbitrarily across the document.

use crate::engine::session::ChapterBoundary;
use crate::engine::WorkAssignment;

/// Split `[0, total_units)` into balanced contiguous ranges
///
/// Produces at most `worker_count` inclusive ranges that are non-empty,
/// disjoint, sorted, and cover the space exactly. Sizes differ by at most
/// one, larger ranges first: 10 units across 3 workers gives
/// `[0,3] [4,6] [7,9]`.
pub fn partition_units(total_units: usize, worker_count: usize) -> Vec<WorkAssignment> {
    if total_units == 0 || worker_count == 0 {
        return Vec::new();
    }

    let workers = worker_count.min(total_units);
    let base = total_units / workers;
    let remainder = total_units % workers;

    let mut ranges = Vec::with_capacity(workers);
    let mut start = 0;
    for i in 0..workers {
        let size = base + usize::from(i < remainder);
        let end = start + size - 1;
        ranges.push(WorkAssignment::Sentences { start, end });
        start = end + 1;
    }

    ranges
}

/// Split chapters into balanced contiguous chapter ranges
///
/// Same balancing as [`partition_units`] over chapter indices. Each range
/// also carries the sentence span covered by its first and last chapter, so
/// progress can still be accounted in sentences.
pub fn partition_chapters(
    chapters: &[ChapterBoundary],
    worker_count: usize,
) -> Vec<WorkAssignment> {
    partition_units(chapters.len(), worker_count)
        .into_iter()
        .map(|range| match range {
            WorkAssignment::Sentences { start, end } => WorkAssignment::Chapters {
                start,
                end,
                unit_start: chapters[start].unit_start,
                unit_end: chapters[end].unit_end,
            },
            other => other,
        })
        .collect()
}

/// Split a missing-index list into explicit per-worker assignments
///
/// The list itself is chunked into `ceil(len / workers)`-sized contiguous
/// slices; the indices inside a slice may be scattered across the unit
/// space. `[2,5,6,7,19]` across 2 workers gives `[2,5,6]` and `[7,19]`.
/// Fewer chunks than workers is possible and fine, idle slots simply get
/// nothing.
pub fn partition_missing(indices: &[usize], worker_count: usize) -> Vec<WorkAssignment> {
    if indices.is_empty() || worker_count == 0 {
        return Vec::new();
    }

    let workers = worker_count.min(indices.len());
    let chunk = indices.len().div_ceil(workers);

    indices
        .chunks(chunk)
        .map(|slice| WorkAssignment::Explicit {
            indices: slice.to_vec(),
        })
        .collect()
}

/// Compress sorted indices into inclusive contiguous ranges
///
/// `[2,5,6,7,19]` becomes `[(2,2), (5,7), (19,19)]`. Used for human-readable
/// resume reports, never for scheduling.
pub fn compress_ranges(indices: &[usize]) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();

    for &index in indices {
        match ranges.last_mut() {
            Some((_, end)) if *end + 1 == index => *end = index,
            _ => ranges.push((index, index)),
        }
    }

    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence_ranges(assignments: &[WorkAssignment]) -> Vec<(usize, usize)> {
        assignments
            .iter()
            .map(|a| match a {
                WorkAssignment::Sentences { start, end } => (*start, *end),
                other => panic!("expected sentence range, got {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_balanced_split() {
        let ranges = sentence_ranges(&partition_units(10, 3));
        assert_eq!(ranges, vec![(0, 3), (4, 6), (7, 9)]);
    }

    #[test]
    fn test_even_split() {
        let ranges = sentence_ranges(&partition_units(12, 4));
        assert_eq!(ranges, vec![(0, 2), (3, 5), (6, 8), (9, 11)]);
    }

    #[test]
    fn test_more_workers_than_units() {
        let ranges = sentence_ranges(&partition_units(2, 8));
        assert_eq!(ranges, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_single_worker_takes_everything() {
        let ranges = sentence_ranges(&partition_units(500, 1));
        assert_eq!(ranges, vec![(0, 499)]);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(partition_units(0, 4).is_empty());
        assert!(partition_units(10, 0).is_empty());
    }

    #[test]
    fn test_partition_covers_exactly() {
        // Ranges must be sorted, disjoint, non-empty, and cover [0, total)
        for total in [1, 2, 3, 7, 10, 99, 100, 101, 1000] {
            for workers in [1, 2, 3, 4, 7, 8, 64] {
                let ranges = sentence_ranges(&partition_units(total, workers));
                assert!(!ranges.is_empty());
                assert!(ranges.len() <= workers);

                let mut expected_start = 0;
                let max_size = total.div_ceil(workers.min(total));
                for &(start, end) in &ranges {
                    assert_eq!(start, expected_start, "gap at {total}x{workers}");
                    assert!(end >= start);
                    assert!(end - start + 1 <= max_size);
                    expected_start = end + 1;
                }
                assert_eq!(expected_start, total, "short cover at {total}x{workers}");
            }
        }
    }

    #[test]
    fn test_partition_sizes_differ_by_at_most_one() {
        for total in [5, 11, 17, 100, 257] {
            for workers in [2, 3, 5, 8] {
                let sizes: Vec<usize> = partition_units(total, workers)
                    .iter()
                    .map(|a| a.unit_count())
                    .collect();
                let min = sizes.iter().min().unwrap();
                let max = sizes.iter().max().unwrap();
                assert!(max - min <= 1, "unbalanced at {total}x{workers}: {sizes:?}");
            }
        }
    }

    #[test]
    fn test_chapter_partition_carries_unit_spans() {
        let chapters = vec![
            ChapterBoundary { chapter: 0, unit_start: 0, unit_end: 9 },
            ChapterBoundary { chapter: 1, unit_start: 10, unit_end: 24 },
            ChapterBoundary { chapter: 2, unit_start: 25, unit_end: 29 },
            ChapterBoundary { chapter: 3, unit_start: 30, unit_end: 49 },
        ];

        let parts = partition_chapters(&chapters, 2);
        assert_eq!(
            parts,
            vec![
                WorkAssignment::Chapters { start: 0, end: 1, unit_start: 0, unit_end: 24 },
                WorkAssignment::Chapters { start: 2, end: 3, unit_start: 25, unit_end: 49 },
            ]
        );

        // Unit spans cover all sentences between them
        let covered: usize = parts.iter().map(|a| a.unit_count()).sum();
        assert_eq!(covered, 50);
    }

    #[test]
    fn test_missing_split() {
        let parts = partition_missing(&[2, 5, 6, 7, 19], 2);
        assert_eq!(
            parts,
            vec![
                WorkAssignment::Explicit { indices: vec![2, 5, 6] },
                WorkAssignment::Explicit { indices: vec![7, 19] },
            ]
        );
    }

    #[test]
    fn test_missing_fewer_chunks_than_workers() {
        // 4 indices across 3 workers chunk at ceil(4/3)=2, giving 2 slices
        let parts = partition_missing(&[1, 2, 3, 4], 3);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].unit_count(), 2);
        assert_eq!(parts[1].unit_count(), 2);
    }

    #[test]
    fn test_missing_preserves_every_index_once() {
        let indices: Vec<usize> = (0..100).filter(|i| i % 3 != 0).collect();
        for workers in [1, 2, 5, 9] {
            let mut seen = Vec::new();
            for part in partition_missing(&indices, workers) {
                match part {
                    WorkAssignment::Explicit { indices } => seen.extend(indices),
                    other => panic!("expected explicit list, got {other:?}"),
                }
            }
            assert_eq!(seen, indices);
        }
    }

    #[test]
    fn test_missing_empty() {
        assert!(partition_missing(&[], 4).is_empty());
    }

    #[test]
    fn test_compress_ranges() {
        assert_eq!(
            compress_ranges(&[2, 5, 6, 7, 19]),
            vec![(2, 2), (5, 7), (19, 19)]
        );
        assert_eq!(compress_ranges(&[0, 1, 2]), vec![(0, 2)]);
        assert!(compress_ranges(&[]).is_empty());
    }
}
