use hashbrown::HashMap;
use log::{debug, info};

use super::snapshot::{MapSnapshot, SlotSize};

/// Remembers the largest size ever seen in each slot across runs, and says
/// whether a new run beat any of them.
///
/// A run is "interesting" if it pushed any slot above its historical maximum,
/// i.e. some call site asked for more memory than it ever has before.
#[derive(Debug, Default)]
pub struct SizeFeedback {
    history: HashMap<usize, usize>,
}

impl SizeFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots in `snapshot` that are above their historical maximum.
    pub fn novelties<'a>(&'a self, snapshot: &'a MapSnapshot) -> impl Iterator<Item = SlotSize> + 'a {
        snapshot
            .iter()
            .filter(|s| s.size > self.history.get(&s.index).copied().unwrap_or(0))
    }

    pub fn is_interesting(&self, snapshot: &MapSnapshot) -> bool {
        let interesting = self.novelties(snapshot).next().is_some();
        debug!("run is {}interesting", if interesting { "" } else { "not " });
        interesting
    }

    /// Fold `snapshot` into the history. Returns how many slots grew.
    pub fn commit(&mut self, snapshot: &MapSnapshot) -> usize {
        let mut grown = 0;
        for s in snapshot.iter() {
            let max = self.history.entry(s.index).or_insert(0);
            if s.size > *max {
                *max = s.size;
                grown += 1;
            }
        }
        if grown != 0 {
            info!("{grown} call sites reached a new maximum allocation size");
        }
        grown
    }

    /// Historical maximum for slot `index`
    pub fn max_for(&self, index: usize) -> usize {
        self.history.get(&index).copied().unwrap_or(0)
    }

    /// Number of slots that have ever been non-zero
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(usize, usize)]) -> MapSnapshot {
        MapSnapshot::from_slots(entries.iter().map(|&(index, size)| SlotSize { index, size }))
    }

    #[test]
    fn first_non_empty_run_is_interesting() {
        let feedback = SizeFeedback::new();
        assert!(!feedback.is_interesting(&MapSnapshot::default()));
        assert!(feedback.is_interesting(&snapshot(&[(4, 10)])));
    }

    #[test]
    fn only_growth_is_interesting() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut feedback = SizeFeedback::new();
        assert_eq!(feedback.commit(&snapshot(&[(4, 10), (8, 100)])), 2);

        assert!(!feedback.is_interesting(&snapshot(&[(4, 10), (8, 50)])));
        let run = snapshot(&[(4, 11), (8, 50)]);
        assert!(feedback.is_interesting(&run));
        assert_eq!(
            feedback.novelties(&run).collect::<Vec<_>>(),
            vec![SlotSize { index: 4, size: 11 }]
        );

        assert_eq!(feedback.commit(&run), 1);
        assert_eq!(feedback.max_for(4), 11);
        assert_eq!(feedback.max_for(8), 100);
        assert_eq!(feedback.len(), 2);
    }

    #[test]
    fn clear_forgets_history() {
        let mut feedback = SizeFeedback::new();
        feedback.commit(&snapshot(&[(1, 1)]));
        feedback.clear();
        assert!(feedback.is_empty());
        assert!(feedback.is_interesting(&snapshot(&[(1, 1)])));
    }
}
