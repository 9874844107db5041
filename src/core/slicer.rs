//! Pure chunk planning: map a blob onto the server's chunk geometry.
//!
//! No I/O happens here — a span is just a byte range. The dispatcher
//! pulls the actual bytes through `ChunkSource::read_range` when the
//! chunk is dispatched.

/// One contiguous byte range of the source, identified by zero-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: u32,
    /// Inclusive start offset.
    pub start: u64,
    /// Exclusive end offset.
    pub end: u64,
}

impl ChunkSpan {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `file_size` bytes into `chunks` spans of `chunk_size` bytes each.
/// Chunk `i` covers `[i * chunk_size, min((i + 1) * chunk_size, file_size))`;
/// the last chunk absorbs the remainder, even if shorter than `chunk_size`.
pub fn plan_chunks(file_size: u64, chunks: u32, chunk_size: u64) -> Vec<ChunkSpan> {
    (0..chunks)
        .map(|index| {
            let start = index as u64 * chunk_size;
            let end = (start + chunk_size).min(file_size);
            ChunkSpan { index, start, end }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_multiple_splits_evenly() {
        let spans = plan_chunks(500, 5, 100);
        assert_eq!(spans.len(), 5);
        for (i, span) in spans.iter().enumerate() {
            assert_eq!(span.index, i as u32);
            assert_eq!(span.start, i as u64 * 100);
            assert_eq!(span.len(), 100);
        }
    }

    #[test]
    fn last_chunk_absorbs_remainder() {
        let spans = plan_chunks(450, 5, 100);
        assert_eq!(spans[4], ChunkSpan { index: 4, start: 400, end: 450 });
        assert_eq!(spans[4].len(), 50);
    }

    #[test]
    fn single_chunk_file() {
        let spans = plan_chunks(37, 1, 100);
        assert_eq!(spans, vec![ChunkSpan { index: 0, start: 0, end: 37 }]);
    }

    #[test]
    fn spans_partition_the_file() {
        // For any geometry satisfying the session invariant, the spans
        // must tile [0, file_size) exactly: contiguous, in order, and
        // every non-final span of full chunk_size.
        for (file_size, chunks, chunk_size) in
            [(500u64, 5u32, 100u64), (401, 5, 100), (1, 1, 1024), (7_000_001, 7, 1_000_000)]
        {
            let spans = plan_chunks(file_size, chunks, chunk_size);
            assert_eq!(spans.len(), chunks as usize);
            let mut cursor = 0u64;
            for (i, span) in spans.iter().enumerate() {
                assert_eq!(span.start, cursor);
                if i + 1 < spans.len() {
                    assert_eq!(span.len(), chunk_size);
                }
                assert!(!span.is_empty());
                cursor = span.end;
            }
            assert_eq!(cursor, file_size);
            let total: u64 = spans.iter().map(ChunkSpan::len).sum();
            assert_eq!(total, file_size);
        }
    }
}
