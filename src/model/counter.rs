use serde::{Deserialize, Serialize};

/// Per-video aggregates kept in the counter store. Eventually consistent with the database and
/// only ever used for display.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub views: u64,
    pub comments: u64,
    pub likes: u64,
}

impl CounterSnapshot {
    pub fn new(views: u64, comments: u64, likes: u64) -> Self {
        Self {
            views,
            comments,
            likes,
        }
    }

    /// Applies `delta` to one counter, clamping at zero.
    pub fn apply(mut self, counter: Counter, delta: i64) -> Self {
        let slot = match counter {
            Counter::Views => &mut self.views,
            Counter::Comments => &mut self.comments,
            Counter::Likes => &mut self.likes,
        };

        *slot = if delta.is_negative() {
            slot.saturating_sub(delta.unsigned_abs())
        } else {
            slot.saturating_add(delta as u64)
        };

        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    Views,
    Comments,
    Likes,
}

impl Counter {
    pub fn field(self) -> &'static str {
        match self {
            Counter::Views => "views",
            Counter::Comments => "comments",
            Counter::Likes => "likes",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_adds_to_one_counter() {
        let snapshot = CounterSnapshot::new(3, 1, 0).apply(Counter::Likes, 2);
        assert_eq!(snapshot, CounterSnapshot::new(3, 1, 2));
    }

    #[test]
    fn apply_never_goes_below_zero() {
        let snapshot = CounterSnapshot::new(0, 1, 0).apply(Counter::Comments, -5);
        assert_eq!(snapshot.comments, 0);
    }
}
