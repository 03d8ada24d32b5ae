use std::{
    fs::File,
    io::{self, Read, Write},
    path::Path,
};

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::alloc::map::AllocMap;

/// One non-empty slot of a map.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotSize {
    pub index: usize,
    pub size: usize,
}

/// A slot that grew suspiciously between a baseline and a later run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    pub index: usize,
    /// What the baseline had in this slot (0 if nothing)
    pub baseline: usize,
    pub observed: usize,
}

/// When is a slot's growth worth reporting?
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyPolicy {
    /// Requests smaller than this are never anomalies
    pub min_size: usize,
    /// If the baseline slot is non-zero, the observed size has to be more
    /// than `growth_factor` times it
    pub growth_factor: usize,
}

impl Default for AnomalyPolicy {
    fn default() -> Self {
        Self {
            min_size: 1 << 20,
            growth_factor: 4,
        }
    }
}

impl AnomalyPolicy {
    pub fn is_anomalous(&self, baseline: usize, observed: usize) -> bool {
        if observed < self.min_size || observed <= baseline {
            return false;
        }
        // a limit that overflows can't be exceeded
        baseline == 0
            || baseline
                .checked_mul(self.growth_factor)
                .is_some_and(|limit| observed > limit)
    }
}

/// Immutable copy of the non-empty slots of an [`AllocMap`], sorted by index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSnapshot {
    slots: Vec<SlotSize>,
}

#[non_exhaustive]
#[derive(Debug)]
pub enum SnapshotFromFileError {
    IoError(io::Error),
    SerdeJsonError(serde_json::error::Error),
}

impl MapSnapshot {
    /// Copy `map`. Allocates, so it must never be called from inside the
    /// hooks.
    pub fn capture(map: &AllocMap) -> Self {
        let slots: Vec<SlotSize> = map
            .iter()
            .filter(|&(_, size)| size != 0)
            .map(|(index, size)| SlotSize { index, size })
            .collect();
        trace!("captured {} non-empty slots", slots.len());
        Self { slots }
    }

    /// Build a snapshot from arbitrary entries. Zero sizes are dropped and
    /// duplicate indices keep their maximum.
    pub fn from_slots<I>(slots: I) -> Self
    where
        I: IntoIterator<Item = SlotSize>,
    {
        let mut slots: Vec<SlotSize> = slots.into_iter().filter(|s| s.size != 0).collect();
        slots.sort_unstable();
        // sorted by (index, size), so the last of each run is the largest
        slots.reverse();
        slots.dedup_by_key(|s| s.index);
        slots.reverse();
        Self { slots }
    }

    /// Size recorded for slot `index`, 0 if empty.
    pub fn get(&self, index: usize) -> usize {
        self.slots
            .binary_search_by_key(&index, |s| s.index)
            .map_or(0, |i| self.slots[i].size)
    }

    pub fn iter(&self) -> impl Iterator<Item = SlotSize> + '_ {
        self.slots.iter().copied()
    }

    /// Number of non-empty slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The largest request in the snapshot, if any.
    pub fn max_size(&self) -> Option<SlotSize> {
        self.slots.iter().copied().max_by_key(|s| s.size)
    }

    /// Every slot of `self` that `policy` considers a suspicious growth over
    /// `baseline`, in index order.
    pub fn anomalies(&self, baseline: &MapSnapshot, policy: &AnomalyPolicy) -> Vec<Anomaly> {
        let anomalies: Vec<Anomaly> = self
            .slots
            .iter()
            .filter_map(|s| {
                let before = baseline.get(s.index);
                policy.is_anomalous(before, s.size).then_some(Anomaly {
                    index: s.index,
                    baseline: before,
                    observed: s.size,
                })
            })
            .collect();
        debug!(
            "{} anomalies over baseline ({} slots vs {} slots)",
            anomalies.len(),
            self.len(),
            baseline.len()
        );
        anomalies
    }

    pub fn write_to_file<P>(&self, path: P) -> io::Result<()>
    where
        P: AsRef<Path>,
    {
        let json = serde_json::to_vec(self).map_err(io::Error::other)?;
        File::create(path)?.write_all(&json)
    }

    pub fn from_file<P>(path: P) -> Result<Self, SnapshotFromFileError>
    where
        P: AsRef<Path>,
    {
        let mut buf = String::new();
        File::open(path)
            .and_then(|mut f| f.read_to_string(&mut buf))
            .map_err(SnapshotFromFileError::IoError)?;
        let snapshot: MapSnapshot =
            serde_json::from_str(&buf).map_err(SnapshotFromFileError::SerdeJsonError)?;
        Ok(Self::from_slots(snapshot.slots))
    }
}
