//! Arena-backed, per-run append-only event sequences.
//!
//! All events of one kind share a single contiguous arena. Each run keeps
//! an index of the arena segments that hold its events: consecutive appends
//! to the same run extend the run's last segment, so a run that is written
//! in bursts is stored as a handful of contiguous slices. Listing a run
//! borrows those slices instead of copying a per-run vector, and counts are
//! O(1).

use std::collections::HashMap;

use colony_types::RunKey;

/// A contiguous range of arena entries belonging to one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    start: usize,
    len: usize,
}

impl Segment {
    const fn end(self) -> usize {
        self.start.saturating_add(self.len)
    }
}

/// Index entry for one run.
#[derive(Debug, Default)]
struct RunIndex {
    segments: Vec<Segment>,
    count: u64,
}

/// Append-only arena of events, indexed by run key.
#[derive(Debug)]
pub struct EventArena<T> {
    /// Every event, in global insertion order.
    entries: Vec<T>,
    /// Segment index per run.
    index: HashMap<RunKey, RunIndex>,
}

impl<T> Default for EventArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventArena<T> {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Total number of events across all runs.
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the arena holds no events.
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of runs with at least one event.
    pub fn run_count(&self) -> usize {
        self.index.len()
    }

    /// Append `event` to the sequence of `run_key`.
    pub fn append(&mut self, run_key: RunKey, event: T) {
        let position = self.entries.len();
        self.entries.push(event);

        let run = self.index.entry(run_key).or_default();
        run.count = run.count.saturating_add(1);
        match run.segments.last_mut() {
            Some(last) if last.end() == position => {
                last.len = last.len.saturating_add(1);
            }
            _ => run.segments.push(Segment {
                start: position,
                len: 1,
            }),
        }
    }

    /// Number of events recorded for `run_key`.
    pub fn count(&self, run_key: &RunKey) -> u64 {
        self.index.get(run_key).map_or(0, |run| run.count)
    }

    /// The contiguous slices holding `run_key`'s events, in order.
    pub fn slices(&self, run_key: &RunKey) -> Vec<&[T]> {
        self.index
            .get(run_key)
            .map(|run| {
                run.segments
                    .iter()
                    .filter_map(|seg| self.entries.get(seg.start..seg.end()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Iterate over `run_key`'s events in submission order.
    pub fn iter_run<'a>(&'a self, run_key: &RunKey) -> impl Iterator<Item = &'a T> + use<'a, T> {
        self.slices(run_key).into_iter().flatten()
    }

    /// Borrow a window of `run_key`'s events, skipping whole segments
    /// before the offset.
    pub fn window(&self, run_key: &RunKey, offset: usize, limit: usize) -> Vec<&T> {
        let Some(run) = self.index.get(run_key) else {
            return Vec::new();
        };

        let mut skip = offset;
        let mut out = Vec::with_capacity(limit.min(self.entries.len()));
        for seg in &run.segments {
            if out.len() >= limit {
                break;
            }
            if skip >= seg.len {
                skip = skip.saturating_sub(seg.len);
                continue;
            }
            let start = seg.start.saturating_add(skip);
            skip = 0;
            let wanted = limit.saturating_sub(out.len());
            let end = seg.end().min(start.saturating_add(wanted));
            if let Some(slice) = self.entries.get(start..end) {
                out.extend(slice);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(label: &str) -> RunKey {
        RunKey::from_label(label)
    }

    #[test]
    fn new_arena_is_empty() {
        let arena: EventArena<u32> = EventArena::new();
        assert!(arena.is_empty());
        assert_eq!(arena.count(&key("a")), 0);
        assert!(arena.slices(&key("a")).is_empty());
    }

    #[test]
    fn consecutive_appends_share_a_segment() {
        let mut arena = EventArena::new();
        for i in 0..5_u32 {
            arena.append(key("a"), i);
        }
        let slices = arena.slices(&key("a"));
        assert_eq!(slices.len(), 1);
        assert_eq!(slices.first().copied(), Some(&[0, 1, 2, 3, 4][..]));
    }

    #[test]
    fn interleaved_runs_keep_their_own_order() {
        let mut arena = EventArena::new();
        arena.append(key("a"), 1);
        arena.append(key("b"), 100);
        arena.append(key("a"), 2);
        arena.append(key("a"), 3);
        arena.append(key("b"), 200);

        let a: Vec<u32> = arena.iter_run(&key("a")).copied().collect();
        let b: Vec<u32> = arena.iter_run(&key("b")).copied().collect();
        assert_eq!(a, vec![1, 2, 3]);
        assert_eq!(b, vec![100, 200]);
        assert_eq!(arena.count(&key("a")), 3);
        assert_eq!(arena.count(&key("b")), 2);
        assert_eq!(arena.slices(&key("a")).len(), 2);
        assert_eq!(arena.run_count(), 2);
        assert_eq!(arena.len(), 5);
    }

    #[test]
    fn window_crosses_segment_boundaries() {
        let mut arena = EventArena::new();
        for i in 0..10_u32 {
            arena.append(key("a"), i);
            if i % 3 == 0 {
                arena.append(key("noise"), 999);
            }
        }
        let window: Vec<u32> = arena.window(&key("a"), 2, 5).into_iter().copied().collect();
        assert_eq!(window, vec![2, 3, 4, 5, 6]);

        let tail: Vec<u32> = arena.window(&key("a"), 8, 50).into_iter().copied().collect();
        assert_eq!(tail, vec![8, 9]);

        assert!(arena.window(&key("a"), 10, 5).is_empty());
        assert!(arena.window(&key("missing"), 0, 5).is_empty());
    }
}
