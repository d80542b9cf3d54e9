//! Per-location run profile
//!
//! Tallies, for every posting site, how many tasks were posted from it and
//! how long their runs took.

use std::time::Duration;

use dashmap::DashMap;

use crate::location::Location;

/// Counters for one posting site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocationTally {
    /// Tasks accepted from this location
    pub posted: u64,
    /// Tasks from this location that ran to completion (or panicked)
    pub runs: u64,
    /// Sum of run durations
    pub total_run_time: Duration,
    /// Longest single run
    pub max_run_time: Duration,
}

impl LocationTally {
    /// Mean run duration, if anything ran
    pub fn average_run_time(&self) -> Option<Duration> {
        if self.runs == 0 {
            return None;
        }
        let runs = u32::try_from(self.runs).unwrap_or(u32::MAX);
        Some(self.total_run_time / runs)
    }
}

#[derive(Debug, Default)]
pub(crate) struct RunProfile {
    tallies: DashMap<Location, LocationTally>,
}

impl RunProfile {
    pub fn record_post(&self, location: Location) {
        self.tallies.entry(location).or_default().posted += 1;
    }

    pub fn record_run(&self, location: Location, duration: Duration) {
        let mut tally = self.tallies.entry(location).or_default();
        tally.runs += 1;
        tally.total_run_time += duration;
        tally.max_run_time = tally.max_run_time.max(duration);
    }

    /// All tallies, most-run first
    pub fn snapshot(&self) -> Vec<(Location, LocationTally)> {
        let mut entries: Vec<_> = self
            .tallies
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        entries.sort_by(|a, b| b.1.runs.cmp(&a.1.runs).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tallies_accumulate() {
        let profile = RunProfile::default();
        let here = Location::new("a.rs", 1, 1);

        profile.record_post(here);
        profile.record_post(here);
        profile.record_run(here, Duration::from_millis(4));
        profile.record_run(here, Duration::from_millis(2));

        let snapshot = profile.snapshot();
        assert_eq!(snapshot.len(), 1);
        let (location, tally) = snapshot[0];
        assert_eq!(location, here);
        assert_eq!(tally.posted, 2);
        assert_eq!(tally.runs, 2);
        assert_eq!(tally.total_run_time, Duration::from_millis(6));
        assert_eq!(tally.max_run_time, Duration::from_millis(4));
        assert_eq!(tally.average_run_time(), Some(Duration::from_millis(3)));
    }

    #[test]
    fn test_snapshot_orders_by_runs() {
        let profile = RunProfile::default();
        let rare = Location::new("a.rs", 1, 1);
        let hot = Location::new("b.rs", 2, 1);

        profile.record_run(rare, Duration::ZERO);
        for _ in 0..3 {
            profile.record_run(hot, Duration::ZERO);
        }

        let order: Vec<Location> = profile.snapshot().into_iter().map(|(l, _)| l).collect();
        assert_eq!(order, vec![hot, rare]);
    }

    #[test]
    fn test_average_without_runs() {
        assert_eq!(LocationTally::default().average_run_time(), None);
    }
}
