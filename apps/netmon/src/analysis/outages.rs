//! Outage inference.
//!
//! Two independent signals:
//! - runs of consecutive failed pings for one target, the primary signal;
//! - unusually long gaps between successful throughput probes, a coarse
//!   signal since those run far less often.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::dataset::Dataset;
use super::stats::{median, median_cadence, seconds_between};
use crate::monitoring::types::PingResult;

/// A gap longer than this many median cadences counts as a throughput outage
pub const THROUGHPUT_GAP_FACTOR: f64 = 2.0;

/// A maximal run of consecutive failed pings for one target in one dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outage {
    pub dataset: String,
    pub target_name: String,
    pub interface: Option<String>,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub failed_checks: usize,
    /// Zero for a single failed sample
    pub duration_seconds: f64,
    /// Median sampling interval of the target, for reference only
    pub cadence_hint_seconds: Option<f64>,
}

/// Gap between two successful throughput probes inferred as an outage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputGap {
    pub dataset: String,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub duration_seconds: f64,
}

/// Ping records of one dataset grouped by target, each sorted by timestamp
pub fn group_by_target(dataset: &Dataset) -> BTreeMap<&str, Vec<&PingResult>> {
    let mut groups: BTreeMap<&str, Vec<&PingResult>> = BTreeMap::new();
    for ping in &dataset.pings {
        groups.entry(ping.target_name.as_str()).or_default().push(ping);
    }
    for samples in groups.values_mut() {
        samples.sort_by_key(|ping| ping.timestamp);
    }
    groups
}

/// Most frequent recorded interface, ties broken by name
fn dominant_interface(samples: &[&PingResult]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for interface in samples.iter().filter_map(|ping| ping.interface.as_deref()) {
        *counts.entry(interface).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(interface, _)| interface.to_string())
}

/// Failure runs for one target's samples, already sorted by timestamp.
pub fn target_outages(dataset: &str, target_name: &str, samples: &[&PingResult]) -> Vec<Outage> {
    let interface = dominant_interface(samples);
    let timestamps: Vec<DateTime<Utc>> = samples.iter().map(|ping| ping.timestamp).collect();
    let cadence = median_cadence(&timestamps);

    let mut outages = Vec::new();
    let mut run: Option<(DateTime<Utc>, DateTime<Utc>, usize)> = None;

    let close = |(start, end, failed_checks): (DateTime<Utc>, DateTime<Utc>, usize)| Outage {
        dataset: dataset.to_string(),
        target_name: target_name.to_string(),
        interface: interface.clone(),
        start_ts: start,
        end_ts: end,
        failed_checks,
        duration_seconds: seconds_between(start, end),
        cadence_hint_seconds: cadence,
    };

    for ping in samples {
        if ping.success {
            if let Some(open) = run.take() {
                outages.push(close(open));
            }
        } else {
            run = Some(match run {
                Some((start, _, count)) => (start, ping.timestamp, count + 1),
                None => (ping.timestamp, ping.timestamp, 1),
            });
        }
    }
    // Still failing at the last sample
    if let Some(open) = run {
        outages.push(close(open));
    }

    outages
}

/// Ping failure runs for every (dataset, target) pair.
pub fn find_outages(datasets: &[Dataset]) -> Vec<Outage> {
    datasets
        .iter()
        .flat_map(|dataset| {
            group_by_target(dataset)
                .into_iter()
                .flat_map(|(target, samples)| target_outages(&dataset.name, target, &samples))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Gaps between successful throughput probes longer than
/// [`THROUGHPUT_GAP_FACTOR`] times the median gap of their dataset.
pub fn find_throughput_gaps(datasets: &[Dataset]) -> Vec<ThroughputGap> {
    let mut gaps = Vec::new();

    for dataset in datasets {
        let mut timestamps: Vec<DateTime<Utc>> = dataset
            .speedtests
            .iter()
            .filter(|speedtest| speedtest.success)
            .map(|speedtest| speedtest.timestamp)
            .collect();
        timestamps.sort();

        let deltas: Vec<f64> = timestamps.windows(2).map(|pair| seconds_between(pair[0], pair[1])).collect();
        let Some(cadence) = median(&deltas).filter(|cadence| *cadence > 0.0) else {
            continue;
        };
        let threshold = cadence * THROUGHPUT_GAP_FACTOR;

        for (pair, delta) in timestamps.windows(2).zip(deltas) {
            if delta > threshold {
                gaps.push(ThroughputGap {
                    dataset: dataset.name.clone(),
                    start_ts: pair[0],
                    end_ts: pair[1],
                    duration_seconds: delta,
                });
            }
        }
    }

    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::{at, ping_series, speedtest};

    #[test]
    fn test_single_outage_between_successes() {
        let dataset = Dataset::new("home", ping_series("google", &[true, false, false, true, true], 10), Vec::new());

        let outages = find_outages(std::slice::from_ref(&dataset));

        assert_eq!(outages.len(), 1);
        let outage = &outages[0];
        assert_eq!(outage.failed_checks, 2);
        assert_eq!(outage.duration_seconds, 10.0);
        assert_eq!(outage.start_ts, at(10));
        assert_eq!(outage.end_ts, at(20));
        assert_eq!(outage.cadence_hint_seconds, Some(10.0));
    }

    #[test]
    fn test_outage_open_at_end() {
        let dataset = Dataset::new("home", ping_series("google", &[true, false, false], 10), Vec::new());

        let outages = find_outages(std::slice::from_ref(&dataset));

        assert_eq!(outages.len(), 1);
        assert_eq!(outages[0].end_ts, at(20));
        assert_eq!(outages[0].failed_checks, 2);
    }

    #[test]
    fn test_single_failure_has_zero_duration() {
        let dataset = Dataset::new("home", ping_series("google", &[false], 10), Vec::new());

        let outages = find_outages(std::slice::from_ref(&dataset));

        assert_eq!(outages.len(), 1);
        assert_eq!(outages[0].duration_seconds, 0.0);
        assert_eq!(outages[0].cadence_hint_seconds, None);
    }

    #[test]
    fn test_targets_are_independent() {
        let mut pings = ping_series("google", &[false, true, false], 10);
        pings.extend(ping_series("cloudflare", &[true, true, true], 10));
        let dataset = Dataset::new("home", pings, Vec::new());

        let outages = find_outages(std::slice::from_ref(&dataset));

        assert_eq!(outages.len(), 2);
        assert!(outages.iter().all(|outage| outage.target_name == "google"));
    }

    #[test]
    fn test_interface_is_most_common() {
        let mut pings = ping_series("google", &[false, false, true], 10);
        pings[0].interface = Some("wlan0".into());
        pings[1].interface = Some("eth0".into());
        pings[2].interface = Some("eth0".into());
        let dataset = Dataset::new("home", pings, Vec::new());

        let outages = find_outages(std::slice::from_ref(&dataset));
        assert_eq!(outages[0].interface.as_deref(), Some("eth0"));
    }

    #[test]
    fn test_throughput_gap_detection() {
        let speedtests = [0, 1800, 3600, 5400, 12600]
            .iter()
            .map(|s| speedtest(*s, Some(100.0)))
            .chain(std::iter::once(speedtest(9000, None)))
            .collect();
        let dataset = Dataset::new("home", Vec::new(), speedtests);

        let gaps = find_throughput_gaps(std::slice::from_ref(&dataset));

        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].start_ts, at(5400));
        assert_eq!(gaps[0].end_ts, at(12600));
        assert_eq!(gaps[0].duration_seconds, 7200.0);
    }

    #[test]
    fn test_throughput_gaps_need_two_successes() {
        let dataset = Dataset::new("home", Vec::new(), vec![speedtest(0, Some(10.0)), speedtest(100, None)]);
        assert!(find_throughput_gaps(std::slice::from_ref(&dataset)).is_empty());
    }
}
