use rand::Rng;

use crate::track::Track;

/// Ordered list of pending tracks for one session. FIFO by default with
/// index-addressed remove/insert/move. Indices here are 0-based; the
/// controller converts from the 1-based positions users see.
#[derive(Debug, Default)]
pub struct TrackQueue {
    items: Vec<Track>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Append a track and return its 1-based queue position.
    pub fn enqueue(&mut self, track: Track) -> usize {
        self.items.push(track);
        self.items.len()
    }

    /// Insert at the front. Used for track-loop re-insertion.
    pub fn push_front(&mut self, track: Track) {
        self.items.insert(0, track);
    }

    pub fn pop_front(&mut self) -> Option<Track> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0))
        }
    }

    pub fn peek_front(&self) -> Option<&Track> {
        self.items.first()
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.items.get(index)
    }

    /// Remove the track at `index`, or `None` when out of range. The queue is
    /// left untouched on failure.
    pub fn remove_at(&mut self, index: usize) -> Option<Track> {
        if index >= self.items.len() {
            return None;
        }
        Some(self.items.remove(index))
    }

    /// Move a track between positions. Returns false (and leaves the queue
    /// unchanged) when either index is out of range.
    pub fn move_track(&mut self, from: usize, to: usize) -> bool {
        if from >= self.items.len() || to >= self.items.len() {
            return false;
        }
        if from == to {
            return true;
        }
        let track = self.items.remove(from);
        self.items.insert(to, track);
        true
    }

    pub fn insert(&mut self, index: usize, track: Track) {
        let index = index.min(self.items.len());
        self.items.insert(index, track);
    }

    /// Fisher-Yates, uniform over permutations.
    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        for i in (1..self.items.len()).rev() {
            let j = rng.gen_range(0..=i);
            self.items.swap(i, j);
        }
    }

    pub fn snapshot(&self) -> Vec<Track> {
        self.items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
