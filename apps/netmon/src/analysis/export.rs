use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ExportError;
use super::dataset::DataBundle;
use super::outages::{Outage, find_outages, find_throughput_gaps, group_by_target};
use super::series::{ChartSeries, failure_series, latency_series, speedtest_series};
use super::stats::{Moments, round3, seconds_between};
use crate::monitoring::types::SpeedtestResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSpan {
    pub dataset: String,
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Statistics for one (dataset, target) pair. Floats carry 3 significant figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryRow {
    pub dataset: String,
    pub target_name: String,
    pub ping_mean_ms: Option<f64>,
    pub ping_std_ms: Option<f64>,
    /// Successful pings with a latency; absent when there were none
    pub n_pings: Option<usize>,
    pub ping_sem_ms: Option<f64>,
    pub failures: usize,
    pub total_checks: usize,
    pub fail_pct: Option<f64>,
    pub outage_events: Option<usize>,
    pub outage_seconds: Option<f64>,
    pub outage_first_ts: Option<DateTime<Utc>>,
    pub outage_last_ts: Option<DateTime<Utc>>,
    pub span_seconds: Option<f64>,
    pub outage_minutes: Option<f64>,
    /// Share of the observed span spent in outage; undefined for a zero span
    pub outage_pct_est: Option<f64>,
    #[serde(flatten)]
    pub throughput: ThroughputSummary,
}

/// Throughput statistics of the dataset a summary row belongs to
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThroughputSummary {
    pub download_mean_mbps: Option<f64>,
    pub download_std_mbps: Option<f64>,
    pub download_n: Option<usize>,
    pub download_sem_mbps: Option<f64>,
    pub upload_mean_mbps: Option<f64>,
    pub upload_std_mbps: Option<f64>,
    pub upload_n: Option<usize>,
    pub upload_sem_mbps: Option<f64>,
    pub speed_ping_mean_ms: Option<f64>,
    pub speed_ping_std_ms: Option<f64>,
    pub speed_ping_n: Option<usize>,
    pub speed_ping_sem_ms: Option<f64>,
}

impl ThroughputSummary {
    fn of(bundle: &DataBundle, dataset: &str) -> Self {
        let Some(dataset) = bundle.datasets.iter().find(|candidate| candidate.name == dataset) else {
            return Self::default();
        };
        let successful: Vec<_> = dataset.speedtests.iter().filter(|st| st.success).collect();
        if successful.is_empty() {
            return Self::default();
        }

        let column = |pick: fn(&SpeedtestResult) -> Option<f64>| {
            Moments::of(&successful.iter().filter_map(|st| pick(st)).collect::<Vec<_>>())
        };
        let download = column(|st| st.download_mbps);
        let upload = column(|st| st.upload_mbps);
        let ping = column(|st| st.ping_ms);

        Self {
            download_mean_mbps: round3(download.mean),
            download_std_mbps: round3(download.std),
            download_n: Some(download.n),
            download_sem_mbps: round3(download.sem),
            upload_mean_mbps: round3(upload.mean),
            upload_std_mbps: round3(upload.std),
            upload_n: Some(upload.n),
            upload_sem_mbps: round3(upload.sem),
            speed_ping_mean_ms: round3(ping.mean),
            speed_ping_std_ms: round3(ping.std),
            speed_ping_n: Some(ping.n),
            speed_ping_sem_ms: round3(ping.sem),
        }
    }
}

/// One inferred outage as exported; reachability runs carry a target and
/// check count, throughput gaps do not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutageRecord {
    pub dataset: String,
    pub target_name: Option<String>,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub duration_seconds: f64,
    pub failed_checks: Option<usize>,
}

/// JSON document read by the web front end
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub palette: BTreeMap<String, String>,
    pub dataset_labels: BTreeMap<String, String>,
    pub dataset_spans: Vec<DatasetSpan>,
    pub summary: Vec<SummaryRow>,
    pub latency_series: BTreeMap<String, Vec<ChartSeries<Option<f64>>>>,
    pub speedtest_series: Vec<ChartSeries<Option<f64>>>,
    pub failure_series: Vec<ChartSeries<usize>>,
    pub failure_order: Vec<String>,
    pub outages: Vec<OutageRecord>,
    pub speedtest_tools: Vec<String>,
}

/// Per (dataset, target) statistics, ordered by dataset then target.
pub fn summarize(bundle: &DataBundle) -> Vec<SummaryRow> {
    let outages = find_outages(&bundle.datasets);
    let mut outages_by_pair: BTreeMap<(&str, &str), Vec<&Outage>> = BTreeMap::new();
    for outage in &outages {
        outages_by_pair.entry((outage.dataset.as_str(), outage.target_name.as_str())).or_default().push(outage);
    }

    let mut datasets: Vec<_> = bundle.datasets.iter().collect();
    datasets.sort_by(|a, b| a.name.cmp(&b.name));

    let mut rows = Vec::new();
    for dataset in datasets {
        let throughput = ThroughputSummary::of(bundle, &dataset.name);

        for (target, samples) in group_by_target(dataset) {
            let latencies: Vec<f64> =
                samples.iter().filter(|ping| ping.success).filter_map(|ping| ping.latency_ms).collect();
            let latency = Moments::of(&latencies);
            let failures = samples.iter().filter(|ping| !ping.success).count();
            let total_checks = samples.len();

            let span_seconds = match (samples.first(), samples.last()) {
                (Some(first), Some(last)) => Some(seconds_between(first.timestamp, last.timestamp)),
                _ => None,
            };

            let pair_outages = outages_by_pair
                .get(&(dataset.name.as_str(), target))
                .map(Vec::as_slice)
                .unwrap_or_default();
            let outage_seconds: f64 = pair_outages.iter().map(|outage| outage.duration_seconds).sum();
            let has_outages = !pair_outages.is_empty();

            rows.push(SummaryRow {
                dataset: dataset.name.clone(),
                target_name: target.to_string(),
                ping_mean_ms: round3(latency.mean),
                ping_std_ms: round3(latency.std),
                n_pings: (latency.n > 0).then_some(latency.n),
                ping_sem_ms: round3(latency.sem),
                failures,
                total_checks,
                fail_pct: round3(Some(100.0 * failures as f64 / total_checks.max(1) as f64)),
                outage_events: has_outages.then_some(pair_outages.len()),
                outage_seconds: if has_outages { round3(Some(outage_seconds)) } else { None },
                outage_first_ts: pair_outages.iter().map(|outage| outage.start_ts).min(),
                outage_last_ts: pair_outages.iter().map(|outage| outage.end_ts).max(),
                span_seconds: round3(span_seconds),
                outage_minutes: round3(Some(outage_seconds / 60.0)),
                outage_pct_est: span_seconds
                    .filter(|span| *span > 0.0)
                    .and_then(|span| round3(Some(100.0 * outage_seconds / span))),
                throughput: throughput.clone(),
            });
        }
    }

    rows
}

/// Assemble the full export document.
pub fn build_export(bundle: &DataBundle, target_hints: &[String]) -> ExportDocument {
    let dataset_spans = bundle
        .ping_spans()
        .into_iter()
        .map(|(dataset, (start, end))| DatasetSpan {
            dataset: dataset.to_string(),
            label: bundle.label(dataset).to_string(),
            start,
            end,
        })
        .collect();

    let outages = find_throughput_gaps(&bundle.datasets)
        .into_iter()
        .map(|gap| OutageRecord {
            dataset: gap.dataset,
            target_name: None,
            start_ts: gap.start_ts,
            end_ts: gap.end_ts,
            duration_seconds: gap.duration_seconds,
            failed_checks: None,
        })
        .collect();

    let speedtest_tools: BTreeSet<String> = bundle
        .datasets
        .iter()
        .flat_map(|dataset| &dataset.speedtests)
        .filter_map(|st| st.tool.clone())
        .collect();

    ExportDocument {
        palette: bundle.colors.clone(),
        dataset_labels: bundle.labels.clone(),
        dataset_spans,
        summary: summarize(bundle),
        latency_series: latency_series(bundle, target_hints),
        speedtest_series: speedtest_series(bundle),
        failure_series: failure_series(bundle),
        failure_order: bundle.order.clone(),
        outages,
        speedtest_tools: speedtest_tools.into_iter().collect(),
    }
}

/// Write `document` as pretty JSON, creating parent directories.
pub fn write_export(document: &ExportDocument, output: &Path) -> Result<(), ExportError> {
    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ExportError::Io { path: parent.to_path_buf(), source })?;
    }
    let json = serde_json::to_string_pretty(document)?;
    std::fs::write(output, json).map_err(|source| ExportError::Io { path: output.to_path_buf(), source })?;

    tracing::info!(output = %output.display(), "Wrote export document");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::dataset::Dataset;
    use crate::analysis::tests::{at, ping_series, speedtest};

    fn bundle() -> DataBundle {
        let mut pings = ping_series("google", &[true, false, false, true, true], 10);
        pings.extend(ping_series("cloudflare", &[true, true, true, true, true], 10));
        let speedtests = vec![speedtest(0, Some(100.0)), speedtest(1800, Some(200.0)), speedtest(3600, None)];
        DataBundle::new(vec![Dataset::new("home", pings, speedtests)], &BTreeMap::new())
    }

    #[test]
    fn test_summary_rows() {
        let rows = summarize(&bundle());

        assert_eq!(rows.len(), 2);
        let cloudflare = &rows[0];
        assert_eq!(cloudflare.target_name, "cloudflare");
        assert_eq!(cloudflare.outage_events, None);
        assert_eq!(cloudflare.outage_minutes, Some(0.0));
        assert_eq!(cloudflare.outage_pct_est, Some(0.0));

        let google = &rows[1];
        assert_eq!(google.n_pings, Some(3));
        assert_eq!(google.failures, 2);
        assert_eq!(google.total_checks, 5);
        assert_eq!(google.fail_pct, Some(40.0));
        assert_eq!(google.outage_events, Some(1));
        assert_eq!(google.outage_seconds, Some(10.0));
        assert_eq!(google.outage_first_ts, Some(at(10)));
        assert_eq!(google.span_seconds, Some(40.0));
        assert_eq!(google.outage_pct_est, Some(25.0));
        assert_eq!(google.ping_mean_ms, Some(12.3));
        assert_eq!(google.ping_std_ms, Some(0.0));

        assert_eq!(google.throughput.download_n, Some(2));
        assert_eq!(google.throughput.download_mean_mbps, Some(150.0));
        assert_eq!(google.throughput.upload_mean_mbps, Some(15.0));
    }

    #[test]
    fn test_target_without_successes_has_null_counts() {
        let pings = ping_series("quad9", &[false, false, false], 10);
        let bundle = DataBundle::new(vec![Dataset::new("office", pings, Vec::new())], &BTreeMap::new());

        let rows = summarize(&bundle);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].n_pings, None);
        assert_eq!(rows[0].ping_mean_ms, None);
        assert_eq!(rows[0].failures, 3);
        assert_eq!(rows[0].fail_pct, Some(100.0));

        let json = serde_json::to_value(&rows[0]).unwrap();
        assert!(json["n_pings"].is_null());
        assert!(json["ping_mean_ms"].is_null());
    }

    #[test]
    fn test_document_keys() {
        let document = build_export(&bundle(), &["google".to_string(), "cloudflare".to_string()]);
        let json = serde_json::to_value(&document).unwrap();

        for key in [
            "palette",
            "datasetLabels",
            "datasetSpans",
            "summary",
            "latencySeries",
            "speedtestSeries",
            "failureSeries",
            "failureOrder",
            "outages",
            "speedtestTools",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["speedtestTools"], serde_json::json!(["speedtest"]));
        assert_eq!(json["failureOrder"], serde_json::json!(["home"]));
        assert_eq!(json["summary"][0]["download_n"], serde_json::json!(2));
        assert_eq!(json["speedtestSeries"][1]["borderDash"], serde_json::json!([6, 4]));
        assert!(json["speedtestSeries"][0].get("borderDash").is_none());
    }

    #[test]
    fn test_write_export_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("web/data.json");

        write_export(&build_export(&bundle(), &[]), &output).unwrap();

        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(output).unwrap()).unwrap();
        assert_eq!(written["datasetSpans"][0]["dataset"], "home");
    }
}
