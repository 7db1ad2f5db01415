//! Splits an inclusive date range into API-sized chunks.
use chrono::{Days, NaiveDate};

pub const DAYS_PER_REQUEST: u32 = 50;

/// Inclusive sub-range of a backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Chunk {
    pub fn len_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

/// Lazy, ascending sequence of contiguous chunks covering `[start, end]`.
#[derive(Debug, Clone)]
pub struct DateChunks {
    next_start: Option<NaiveDate>,
    end: NaiveDate,
    chunk_size: u64,
}

impl DateChunks {
    pub fn new(start: NaiveDate, end: NaiveDate, chunk_size_days: u32) -> Self {
        Self {
            next_start: (start <= end).then_some(start),
            end,
            chunk_size: u64::from(chunk_size_days.max(1)),
        }
    }
}

impl Iterator for DateChunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let start = self.next_start?;
        let end = start
            .checked_add_days(Days::new(self.chunk_size - 1))
            .map_or(self.end, |d| d.min(self.end));
        self.next_start = end
            .checked_add_days(Days::new(1))
            .filter(|next| *next <= self.end);
        Some(Chunk { start, end })
    }
}

/// Number of calendar days in `[start, end]`, zero when the range is inverted.
pub fn total_days(start: NaiveDate, end: NaiveDate) -> usize {
    if start > end {
        0
    } else {
        (end - start).num_days() as usize + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn assert_partition(start: NaiveDate, end: NaiveDate, size: u32) {
        let chunks: Vec<Chunk> = DateChunks::new(start, end, size).collect();
        assert_eq!(chunks.first().unwrap().start, start);
        assert_eq!(chunks.last().unwrap().end, end);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end.succ_opt().unwrap(), pair[1].start);
        }
        for chunk in &chunks {
            assert!(chunk.start <= chunk.end);
            assert!(chunk.len_days() <= size as usize);
            assert!(chunk.end <= end);
        }
        let covered: usize = chunks.iter().map(Chunk::len_days).sum();
        assert_eq!(covered, total_days(start, end));
    }

    #[test]
    fn single_day_yields_one_chunk() {
        let chunks: Vec<_> = DateChunks::new(d(2020, 1, 1), d(2020, 1, 1), 50).collect();
        assert_eq!(chunks, vec![Chunk { start: d(2020, 1, 1), end: d(2020, 1, 1) }]);
        assert_eq!(chunks[0].len_days(), 1);
    }

    #[test]
    fn exact_multiple_has_no_trailing_chunk() {
        let chunks: Vec<_> = DateChunks::new(d(2020, 1, 1), d(2020, 2, 19), 50).collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len_days(), 50);
    }

    #[test]
    fn partitions_hold_for_assorted_ranges() {
        assert_partition(d(2020, 1, 1), d(2020, 1, 5), 50);
        assert_partition(d(2020, 1, 1), d(2020, 2, 20), 50);
        assert_partition(d(1995, 6, 16), d(2024, 12, 31), 50);
        assert_partition(d(2019, 12, 25), d(2020, 3, 3), 7);
        assert_partition(d(2020, 2, 27), d(2020, 3, 2), 1);
    }

    #[test]
    fn last_chunk_is_clamped_to_end() {
        let chunks: Vec<_> = DateChunks::new(d(2020, 1, 1), d(2020, 2, 25), 50).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].end, d(2020, 2, 19));
        assert_eq!(chunks[1], Chunk { start: d(2020, 2, 20), end: d(2020, 2, 25) });
    }

    #[test]
    fn inverted_range_is_empty() {
        assert_eq!(DateChunks::new(d(2020, 1, 2), d(2020, 1, 1), 50).count(), 0);
        assert_eq!(total_days(d(2020, 1, 2), d(2020, 1, 1)), 0);
    }

    #[test]
    fn zero_size_is_treated_as_one_day() {
        assert_eq!(DateChunks::new(d(2020, 1, 1), d(2020, 1, 3), 0).count(), 3);
    }

    #[test]
    fn chunk_days_cover_the_chunk() {
        let chunk = Chunk { start: d(2020, 1, 30), end: d(2020, 2, 2) };
        let days: Vec<_> = chunk.days().collect();
        assert_eq!(days, vec![d(2020, 1, 30), d(2020, 1, 31), d(2020, 2, 1), d(2020, 2, 2)]);
    }
}
