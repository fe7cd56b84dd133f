use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::dataset::DataBundle;
use super::stats::{median_cadence, round3, seconds_between};

/// A gap longer than this many median cadences gets a null break point
pub const GAP_BREAK_FACTOR: f64 = 3.0;

/// Dash pattern of the upload line
const UPLOAD_DASH: [u32; 2] = [6, 4];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point<Y> {
    pub x: DateTime<Utc>,
    pub y: Y,
}

/// One line or scatter series as consumed by the chart front end
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSeries<Y> {
    pub label: String,
    pub dataset: String,
    pub border_color: String,
    pub background_color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_dash: Option<[u32; 2]>,
    pub data: Vec<Point<Y>>,
}

impl<Y> ChartSeries<Y> {
    fn new(bundle: &DataBundle, dataset: &str, label: String, data: Vec<Point<Y>>) -> Self {
        let color = bundle.color(dataset).to_string();
        Self {
            label,
            dataset: dataset.to_string(),
            border_color: color.clone(),
            background_color: color,
            border_dash: None,
            data,
        }
    }
}

/// Insert a `(midpoint, null)` point wherever consecutive points are more
/// than `threshold_seconds` apart.
pub fn add_gap_breaks(points: Vec<Point<Option<f64>>>, threshold_seconds: Option<f64>) -> Vec<Point<Option<f64>>> {
    let Some(threshold) = threshold_seconds.filter(|threshold| *threshold > 0.0) else {
        return points;
    };

    let mut out = Vec::with_capacity(points.len());
    let mut previous: Option<DateTime<Utc>> = None;
    for point in points {
        if let Some(prev) = previous {
            if seconds_between(prev, point.x) > threshold {
                out.push(Point { x: prev + (point.x - prev) / 2, y: None });
            }
        }
        previous = Some(point.x);
        out.push(point);
    }
    out
}

fn gap_threshold(timestamps: &[DateTime<Utc>]) -> Option<f64> {
    median_cadence(timestamps).map(|cadence| cadence * GAP_BREAK_FACTOR)
}

/// Order targets so the first match for each hint comes first, followed by
/// the remaining targets in their original order.
pub fn pick_targets(targets: &[String], hints: &[String]) -> Vec<String> {
    let mut picked: Vec<String> = Vec::new();
    for hint in hints {
        let hint = hint.to_lowercase();
        if let Some(target) = targets
            .iter()
            .find(|target| target.to_lowercase().contains(&hint) && !picked.contains(target))
        {
            picked.push(target.clone());
        }
    }
    for target in targets {
        if !picked.contains(target) {
            picked.push(target.clone());
        }
    }
    picked
}

/// Dataset names ordered by their first timestamp in `first_seen`, ties in load order
fn chronological(bundle: &DataBundle, first_seen: impl Fn(usize) -> Option<DateTime<Utc>>) -> Vec<usize> {
    let mut indices: Vec<(DateTime<Utc>, usize)> =
        (0..bundle.datasets.len()).filter_map(|i| Some((first_seen(i)?, i))).collect();
    indices.sort();
    indices.into_iter().map(|(_, i)| i).collect()
}

/// Latency lines per target, one series per dataset. Failed samples are
/// exported as null so the line breaks.
pub fn latency_series(bundle: &DataBundle, hints: &[String]) -> BTreeMap<String, Vec<ChartSeries<Option<f64>>>> {
    let mut by_target = BTreeMap::new();

    for target in pick_targets(&bundle.target_names(), hints) {
        let samples_of = |i: usize| {
            bundle.datasets[i].pings.iter().filter(|ping| ping.target_name == target).collect::<Vec<_>>()
        };

        let order = chronological(bundle, |i| samples_of(i).first().map(|ping| ping.timestamp));
        let series = order
            .into_iter()
            .map(|i| {
                let dataset = &bundle.datasets[i].name;
                let samples = samples_of(i);
                let timestamps: Vec<DateTime<Utc>> = samples.iter().map(|ping| ping.timestamp).collect();
                let points = samples
                    .iter()
                    .map(|ping| Point {
                        x: ping.timestamp,
                        y: if ping.success { round3(ping.latency_ms) } else { None },
                    })
                    .collect();
                let data = add_gap_breaks(points, gap_threshold(&timestamps));
                ChartSeries::new(bundle, dataset, bundle.label(dataset).to_string(), data)
            })
            .collect();

        by_target.insert(target, series);
    }

    by_target
}

/// Download and upload lines per dataset from successful throughput probes
pub fn speedtest_series(bundle: &DataBundle) -> Vec<ChartSeries<Option<f64>>> {
    let order = chronological(bundle, |i| bundle.datasets[i].speedtests.first().map(|st| st.timestamp));
    let mut series = Vec::new();

    for i in order {
        let dataset = &bundle.datasets[i];
        let timestamps: Vec<DateTime<Utc>> = dataset.speedtests.iter().map(|st| st.timestamp).collect();
        let threshold = gap_threshold(&timestamps);

        let successful: Vec<_> = dataset.speedtests.iter().filter(|st| st.success).collect();
        let download: Vec<_> =
            successful.iter().map(|st| Point { x: st.timestamp, y: round3(st.download_mbps) }).collect();
        let upload: Vec<_> =
            successful.iter().map(|st| Point { x: st.timestamp, y: round3(st.upload_mbps) }).collect();

        let download = add_gap_breaks(download, threshold);
        let upload = add_gap_breaks(upload, threshold);
        let label = bundle.label(&dataset.name);

        if !download.is_empty() {
            series.push(ChartSeries::new(bundle, &dataset.name, format!("{label} - Download"), download));
        }
        if !upload.is_empty() {
            let mut line = ChartSeries::new(bundle, &dataset.name, format!("{label} - Upload"), upload);
            line.border_dash = Some(UPLOAD_DASH);
            series.push(line);
        }
    }

    series
}

/// Failed pings per dataset, plotted at the dataset's row in `bundle.order`
pub fn failure_series(bundle: &DataBundle) -> Vec<ChartSeries<usize>> {
    bundle
        .order
        .iter()
        .enumerate()
        .filter_map(|(row, name)| {
            let dataset = bundle.datasets.iter().find(|dataset| &dataset.name == name)?;
            let data: Vec<Point<usize>> = dataset
                .pings
                .iter()
                .filter(|ping| !ping.success)
                .map(|ping| Point { x: ping.timestamp, y: row })
                .collect();
            if data.is_empty() {
                return None;
            }
            Some(ChartSeries::new(bundle, name, bundle.label(name).to_string(), data))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::dataset::{Dataset, PALETTE};
    use crate::analysis::tests::{at, ping, ping_series, speedtest};

    fn points(seconds: &[i64]) -> Vec<Point<Option<f64>>> {
        seconds.iter().map(|s| Point { x: at(*s), y: Some(1.0) }).collect()
    }

    #[test]
    fn test_gap_break_inserted_at_midpoint() {
        let input = points(&[0, 10, 20, 100]);
        let timestamps: Vec<_> = input.iter().map(|point| point.x).collect();

        let out = add_gap_breaks(input, gap_threshold(&timestamps));

        assert_eq!(out.len(), 5);
        assert_eq!(out.iter().filter(|point| point.y.is_none()).count(), 1);
        assert_eq!(out[3], Point { x: at(60), y: None });
        assert_eq!(out[4].x, at(100));
    }

    #[test]
    fn test_no_breaks_without_cadence() {
        let out = add_gap_breaks(points(&[0]), gap_threshold(&[at(0)]));
        assert_eq!(out.len(), 1);
        assert_eq!(add_gap_breaks(points(&[0, 500]), None).len(), 2);
    }

    #[test]
    fn test_pick_targets_by_hint() {
        let targets = vec!["quad9".to_string(), "Cloudflare DNS".to_string(), "google".to_string()];
        let hints = vec!["google".to_string(), "cloudflare".to_string()];
        assert_eq!(pick_targets(&targets, &hints), vec!["google", "Cloudflare DNS", "quad9"]);
    }

    #[test]
    fn test_latency_series_nulls_failures() {
        let dataset = Dataset::new("home", ping_series("google", &[true, false, true], 10), Vec::new());
        let bundle = DataBundle::new(vec![dataset], &BTreeMap::new());

        let series = latency_series(&bundle, &["google".to_string()]);
        let google = &series["google"];

        assert_eq!(google.len(), 1);
        let ys: Vec<Option<f64>> = google[0].data.iter().map(|point| point.y).collect();
        assert_eq!(ys, vec![Some(12.3), None, Some(12.3)]);
        assert_eq!(google[0].border_color, PALETTE[0]);
    }

    #[test]
    fn test_speedtest_series_marks_upload_dashed() {
        let dataset = Dataset::new(
            "home",
            vec![ping("google", 0, true)],
            vec![speedtest(0, Some(123.456)), speedtest(1800, None), speedtest(3600, Some(99.0))],
        );
        let bundle = DataBundle::new(vec![dataset], &BTreeMap::new());

        let series = speedtest_series(&bundle);

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].label, "home - Download");
        assert_eq!(series[0].border_dash, None);
        assert_eq!(series[0].data[0].y, Some(123.0));
        assert_eq!(series[0].data.len(), 2);
        assert_eq!(series[1].label, "home - Upload");
        assert_eq!(series[1].border_dash, Some([6, 4]));
    }

    #[test]
    fn test_failure_series_uses_dataset_row() {
        let first = Dataset::new("a", ping_series("google", &[true, true], 10), Vec::new());
        let second = Dataset::new("b", ping_series("google", &[false, true, false], 10), Vec::new());
        let bundle = DataBundle::new(vec![first, second], &BTreeMap::new());

        let series = failure_series(&bundle);

        assert_eq!(series.len(), 1);
        assert_eq!(series[0].dataset, "b");
        assert!(series[0].data.iter().all(|point| point.y == 1));
        assert_eq!(series[0].data.len(), 2);
    }
}
