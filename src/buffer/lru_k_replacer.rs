use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, Timestamp};

/// Access history for a single frame
#[derive(Debug)]
struct AccessHistory {
    /// Timestamps of the last up-to-k accesses, most recent at the back
    history: VecDeque<Timestamp>,
    /// Whether the frame currently participates in eviction
    is_evictable: bool,
}

impl AccessHistory {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    fn record(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_back(timestamp);
        while self.history.len() > k {
            self.history.pop_front();
        }
    }

    /// Backward k-distance at `now`; None stands for +inf (fewer than k
    /// recorded accesses).
    fn k_distance(&self, now: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            Some(now - self.history[self.history.len() - k])
        }
    }

    fn earliest_access(&self) -> Option<Timestamp> {
        self.history.front().copied()
    }
}

struct ReplacerState {
    /// Per-frame access history
    frames: HashMap<FrameId, AccessHistory>,
    /// Monotonic logical clock, advanced on every recorded access
    current_timestamp: Timestamp,
    /// Number of evictable frames
    num_evictable: usize,
}

/// LRU-K replacement policy.
///
/// `evict` removes the frame whose backward k-distance (time since the k-th
/// most recent access) is largest. Frames with fewer than k accesses have
/// infinite k-distance; among those, the one with the earliest first access
/// loses. Only frames marked evictable participate.
///
/// One internal lock makes every public method mutually exclusive.
pub struct LruKReplacer {
    k: usize,
    max_frames: usize,
    state: Mutex<ReplacerState>,
}

impl LruKReplacer {
    pub fn new(k: usize, max_frames: usize) -> Self {
        assert!(k >= 1, "LRU-K needs k >= 1");
        Self {
            k,
            max_frames,
            state: Mutex::new(ReplacerState {
                frames: HashMap::new(),
                current_timestamp: 0,
                num_evictable: 0,
            }),
        }
    }

    /// Evicts the evictable frame with the largest backward k-distance and
    /// erases its history. Returns None when nothing is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if state.num_evictable == 0 {
            return None;
        }

        let now = state.current_timestamp;
        let k = self.k;

        let mut victim: Option<FrameId> = None;
        let mut victim_dist: Option<Timestamp> = None;
        let mut victim_first: Option<Timestamp> = None;

        for (frame_id, info) in state.frames.iter() {
            if !info.is_evictable {
                continue;
            }

            let dist = info.k_distance(now, k);
            let first = info.earliest_access();

            let replaces = match (victim_dist, dist) {
                // candidate finite, victim infinite: keep victim
                (None, Some(_)) => false,
                // candidate infinite beats any finite victim
                (Some(_), None) => true,
                // both infinite: earliest first access loses
                (None, None) => match (victim_first, first) {
                    (Some(v), Some(c)) => c < v,
                    (None, Some(_)) => true,
                    _ => false,
                },
                (Some(v), Some(c)) => c > v,
            };

            if victim.is_none() || replaces {
                victim = Some(*frame_id);
                victim_dist = dist;
                victim_first = first;
            }
        }

        if let Some(frame_id) = victim {
            state.frames.remove(&frame_id);
            state.num_evictable -= 1;
        }
        victim
    }

    /// Appends an access at the current timestamp for the given frame.
    pub fn record_access(&self, frame_id: FrameId) {
        if frame_id.as_usize() >= self.max_frames {
            return;
        }

        let mut state = self.state.lock();
        state.current_timestamp += 1;
        let timestamp = state.current_timestamp;
        let k = self.k;
        state
            .frames
            .entry(frame_id)
            .or_insert_with(AccessHistory::new)
            .record(timestamp, k);
    }

    /// Moves a frame in or out of the evictable set. The buffer pool calls
    /// this whenever a pin count crosses zero.
    pub fn set_evictable(&self, frame_id: FrameId, is_evictable: bool) {
        if frame_id.as_usize() >= self.max_frames {
            return;
        }

        let mut state = self.state.lock();
        match state.frames.get_mut(&frame_id) {
            Some(info) => {
                if info.is_evictable != is_evictable {
                    info.is_evictable = is_evictable;
                    if is_evictable {
                        state.num_evictable += 1;
                    } else {
                        state.num_evictable -= 1;
                    }
                }
            }
            None if is_evictable => {
                let mut info = AccessHistory::new();
                info.is_evictable = true;
                state.frames.insert(frame_id, info);
                state.num_evictable += 1;
            }
            None => {}
        }
    }

    /// Erases a frame's history. The frame must be evictable; removing a
    /// pinned frame is a caller bug and aborts.
    pub fn remove(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if let Some(info) = state.frames.remove(&frame_id) {
            assert!(
                info.is_evictable,
                "removed frame {frame_id} from the replacer while it is pinned"
            );
            state.num_evictable -= 1;
        }
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.state.lock().num_evictable
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_replacer_is_empty() {
        let replacer = LruKReplacer::new(2, 10);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.k(), 2);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_infinite_distance_evicted_first() {
        let replacer = LruKReplacer::new(2, 10);

        // Frame 0 has two accesses, frame 1 only one.
        replacer.record_access(FrameId::new(0));
        replacer.record_access(FrameId::new(0));
        replacer.record_access(FrameId::new(1));

        replacer.set_evictable(FrameId::new(0), true);
        replacer.set_evictable(FrameId::new(1), true);

        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    }

    #[test]
    fn test_largest_k_distance_wins() {
        let replacer = LruKReplacer::new(2, 10);

        for frame in 0..3u32 {
            replacer.record_access(FrameId::new(frame));
            replacer.record_access(FrameId::new(frame));
            replacer.set_evictable(FrameId::new(frame), true);
        }

        // Frame 0's second-most-recent access is oldest.
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    }

    #[test]
    fn test_pinned_frames_not_evicted() {
        let replacer = LruKReplacer::new(2, 10);

        replacer.record_access(FrameId::new(0));
        replacer.record_access(FrameId::new(1));
        replacer.set_evictable(FrameId::new(1), true);

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_toggle_evictable_adjusts_size() {
        let replacer = LruKReplacer::new(2, 10);

        replacer.record_access(FrameId::new(0));
        replacer.set_evictable(FrameId::new(0), true);
        assert_eq!(replacer.size(), 1);

        replacer.set_evictable(FrameId::new(0), false);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);

        replacer.set_evictable(FrameId::new(0), true);
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    }

    #[test]
    fn test_remove_erases_history() {
        let replacer = LruKReplacer::new(2, 10);

        replacer.record_access(FrameId::new(0));
        replacer.set_evictable(FrameId::new(0), true);
        replacer.remove(FrameId::new(0));

        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    #[should_panic]
    fn test_remove_pinned_frame_panics() {
        let replacer = LruKReplacer::new(2, 10);
        replacer.record_access(FrameId::new(0));
        replacer.remove(FrameId::new(0));
    }

    #[test]
    fn test_history_capped_at_k() {
        let replacer = LruKReplacer::new(2, 10);

        for _ in 0..10 {
            replacer.record_access(FrameId::new(0));
        }
        replacer.record_access(FrameId::new(1));
        replacer.record_access(FrameId::new(1));

        replacer.set_evictable(FrameId::new(0), true);
        replacer.set_evictable(FrameId::new(1), true);

        // Only frame 0's most recent two accesses count, and they are older
        // than frame 1's.
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    }
}
