//! Bin-indexed registry of discovered peaks

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::clock::Clock;
use crate::dsp::Peak;

const DEFAULT_PEAK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PeakState {
    New,
    Active,
    Inactive,
}

#[derive(Debug)]
struct TrackedPeak {
    peak: Peak,
    state: PeakState,
    since: Instant,
}

type Entry = Rc<RefCell<TrackedPeak>>;

/// Registry of discovered peaks, one slot per FFT bin
///
/// Every bin of a peak's range points to the same shared record, so a bin
/// index is owned by at most one peak. Peaks start out `new`, are promoted
/// to `active` when a listener binds to them, fall back to `inactive` on
/// detach, and expire after a timeout unless active.
///
/// The table lives on the receiver loop thread and is never shared.
pub struct PeaksTable {
    bins: Vec<Option<Entry>>,
    clock: Arc<dyn Clock>,
    peak_timeout: Duration,
}

impl PeaksTable {
    pub fn new(size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            bins: std::iter::repeat_with(|| None).take(size).collect(),
            clock,
            peak_timeout: DEFAULT_PEAK_TIMEOUT,
        }
    }

    /// Register a discovered peak
    ///
    /// If any bin of the peak's range is covered by an active or inactive
    /// peak, the existing peak wins and the put is a no-op. Covering `new`
    /// peaks are replaced.
    pub fn put(&mut self, peak: &Peak) {
        let mut clear_from = None;
        let mut clear_to = None;

        for i in peak.from_bin..=usize::min(peak.to_bin, self.bins.len() - 1) {
            let Some(existing) = &self.bins[i] else {
                continue;
            };
            let existing = existing.borrow();
            if existing.state != PeakState::New {
                return;
            }
            clear_from.get_or_insert(existing.peak.from_bin);
            clear_to = Some(existing.peak.to_bin);
        }

        if let (Some(from), Some(to)) = (clear_from, clear_to) {
            self.clear(from, to);
        }

        self.insert(peak);
    }

    /// Register a peak regardless of what it covers
    ///
    /// Used for VFO-driven manual attachment: any covered peak is removed
    /// across its full bin range first.
    pub fn force_put(&mut self, peak: &Peak) {
        for i in peak.from_bin..=usize::min(peak.to_bin, self.bins.len() - 1) {
            let Some(existing) = &self.bins[i] else {
                continue;
            };
            let (from, to) = {
                let existing = existing.borrow();
                (existing.peak.from_bin, existing.peak.to_bin)
            };
            self.clear(from, to);
        }

        self.insert(peak);
    }

    fn insert(&mut self, peak: &Peak) {
        let entry = Rc::new(RefCell::new(TrackedPeak {
            peak: peak.clone(),
            state: PeakState::New,
            since: self.clock.now(),
        }));
        for i in peak.from_bin..=usize::min(peak.to_bin, self.bins.len() - 1) {
            self.bins[i] = Some(Rc::clone(&entry));
        }
    }

    fn clear(&mut self, from: usize, to: usize) {
        for i in from..=usize::min(to, self.bins.len() - 1) {
            self.bins[i] = None;
        }
    }

    /// The peak covering the given bin
    pub fn get(&self, bin: usize) -> Option<Peak> {
        let entry = self.bins.get(bin)?.as_ref()?;
        Some(entry.borrow().peak.clone())
    }

    /// Remove peaks that are not active and have outlived the peak timeout
    pub fn cleanup(&mut self) {
        let now = self.clock.now();
        let mut i = 0;
        while i < self.bins.len() {
            let Some(entry) = &self.bins[i] else {
                i += 1;
                continue;
            };
            let (state, since, from, to) = {
                let entry = entry.borrow();
                (entry.state, entry.since, entry.peak.from_bin, entry.peak.to_bin)
            };
            i += 1;

            if state == PeakState::Active {
                continue;
            }
            if now.duration_since(since) < self.peak_timeout {
                continue;
            }

            self.clear(from, to);
            i = to + 1;
        }
    }

    pub fn reset(&mut self) {
        self.bins.fill_with(|| None);
    }

    /// Promote a peak to active; legal from `new` and `inactive`
    pub fn activate(&mut self, peak: &Peak) {
        let Some(entry) = self.get_internal(peak) else {
            return;
        };
        let mut entry = entry.borrow_mut();
        if entry.state == PeakState::Active {
            return;
        }
        entry.state = PeakState::Active;
    }

    /// Demote an active peak to inactive
    pub fn deactivate(&mut self, peak: &Peak) {
        let Some(entry) = self.get_internal(peak) else {
            return;
        };
        let mut entry = entry.borrow_mut();
        if entry.state != PeakState::Active {
            return;
        }
        entry.state = PeakState::Inactive;
    }

    fn get_internal(&self, peak: &Peak) -> Option<Entry> {
        let entry = self.bins.get(peak.from_bin)?.as_ref()?;
        if entry.borrow().peak.to_bin != peak.to_bin {
            return None;
        }
        Some(Rc::clone(entry))
    }

    /// Any peak in state `new`, or none
    ///
    /// Chooses randomly among the new peaks to avoid head-of-line bias
    /// towards the low end of the spectrum.
    pub fn find_next(&self) -> Option<Peak> {
        let mut rng = rand::thread_rng();
        for _ in 0..self.bins.len() / 2 {
            let i = rng.gen_range(0..self.bins.len());
            if let Some(entry) = &self.bins[i] {
                let entry = entry.borrow();
                if entry.state == PeakState::New {
                    return Some(entry.peak.clone());
                }
            }
        }

        for entry in self.bins.iter().flatten() {
            let entry = entry.borrow();
            if entry.state == PeakState::New {
                return Some(entry.peak.clone());
            }
        }

        None
    }

    #[cfg(test)]
    fn state_at(&self, bin: usize) -> Option<PeakState> {
        self.bins[bin].as_ref().map(|e| e.borrow().state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::clock::{ManualClock, WallClock};

    fn peak(from: usize, to: usize) -> Peak {
        Peak {
            from_bin: from,
            to_bin: to,
            ..Peak::default()
        }
    }

    #[test]
    fn test_put_into_empty_table() {
        let mut table = PeaksTable::new(512, Arc::new(WallClock));
        let p = peak(234, 235);

        table.put(&p);

        assert_eq!(table.get(234), Some(p.clone()));
        assert_eq!(table.get(235), Some(p));
        assert_eq!(table.get(233), None);
        assert_eq!(table.state_at(234), Some(PeakState::New));
    }

    #[test]
    fn test_put_respects_existing_peaks() {
        let mut table = PeaksTable::new(12, Arc::new(WallClock));
        let new1 = peak(3, 4);
        let new2 = peak(5, 6);
        let active = peak(8, 8);
        let inactive = peak(10, 10);
        table.put(&new1);
        table.put(&new2);
        table.put(&active);
        table.activate(&active);
        table.put(&inactive);
        table.activate(&inactive);
        table.deactivate(&inactive);

        // overlaps nothing: inserted
        let put1 = peak(1, 2);
        // overlaps a new peak: replaces it over its full range
        let put2 = peak(4, 5);
        // overlaps an active peak: no-op
        let put3 = peak(7, 8);
        // overlaps an inactive peak: no-op
        let put4 = peak(10, 11);
        table.put(&put1);
        table.put(&put2);
        table.put(&put3);
        table.put(&put4);

        assert_eq!(table.get(0), None);
        assert_eq!(table.get(1), Some(put1.clone()));
        assert_eq!(table.get(2), Some(put1));
        assert_eq!(table.get(3), None);
        assert_eq!(table.get(4), Some(put2.clone()));
        assert_eq!(table.get(5), Some(put2));
        assert_eq!(table.get(6), None);
        assert_eq!(table.get(7), None);
        assert_eq!(table.get(8), Some(active));
        assert_eq!(table.get(9), None);
        assert_eq!(table.get(10), Some(inactive));
        assert_eq!(table.get(11), None);
    }

    #[test]
    fn test_force_put_replaces_active_peaks() {
        let mut table = PeaksTable::new(12, Arc::new(WallClock));
        let active = peak(4, 6);
        table.put(&active);
        table.activate(&active);

        let forced = peak(5, 5);
        table.force_put(&forced);

        assert_eq!(table.get(4), None);
        assert_eq!(table.get(5), Some(forced));
        assert_eq!(table.get(6), None);
    }

    #[test]
    fn test_cleanup_new_peak() {
        let clock = Arc::new(ManualClock::new());
        let mut table = PeaksTable::new(512, clock.clone());
        let p = peak(234, 235);

        table.put(&p);
        table.cleanup();

        assert_eq!(table.get(234), Some(p.clone()));
        assert_eq!(table.get(235), Some(p));

        clock.add(DEFAULT_PEAK_TIMEOUT + Duration::from_secs(1));
        table.cleanup();

        assert_eq!(table.get(234), None);
        assert_eq!(table.get(235), None);
    }

    #[test]
    fn test_cleanup_keeps_active_peak() {
        let clock = Arc::new(ManualClock::new());
        let mut table = PeaksTable::new(512, clock.clone());
        let p = peak(234, 235);

        table.put(&p);
        table.activate(&p);

        clock.add(DEFAULT_PEAK_TIMEOUT + Duration::from_secs(1));
        table.cleanup();

        assert_eq!(table.get(234), Some(p.clone()));
        assert_eq!(table.get(235), Some(p.clone()));

        table.deactivate(&p);
        table.cleanup();

        assert_eq!(table.get(234), None);
        assert_eq!(table.get(235), None);
    }

    #[test]
    fn test_find_next() {
        let mut table = PeaksTable::new(512, Arc::new(WallClock));
        let p = peak(234, 235);

        table.put(&p);

        let next = table.find_next();
        assert_eq!(next, Some(p.clone()));

        table.activate(&p);
        assert_eq!(table.find_next(), None);

        table.deactivate(&p);
        assert_eq!(table.find_next(), None);
    }

    #[test]
    fn test_activate_only_from_legal_states(){
        let mut table = PeaksTable::new(16, Arc::new(WallClock));
        let p = peak(3, 4);
        table.put(&p);

        // deactivate before activate does nothing
        table.deactivate(&p);
        assert_eq!(table.state_at(3), Some(PeakState::New));

        table.activate(&p);
        assert_eq!(table.state_at(3), Some(PeakState::Active));

        table.deactivate(&p);
        assert_eq!(table.state_at(3), Some(PeakState::Inactive));

        // inactive peaks may be activated again
        table.activate(&p);
        assert_eq!(table.state_at(3), Some(PeakState::Active));
    }
}
