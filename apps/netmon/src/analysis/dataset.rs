use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::ExportError;
use crate::database::{MeasurementStore, Store};
use crate::monitoring::types::{PingResult, SpeedtestResult};

/// Matplotlib's `tab10`, assigned to datasets in load order
pub const PALETTE: [&str; 10] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f", "#bcbd22",
    "#17becf",
];

/// Color for a dataset missing from the palette
pub const FALLBACK_COLOR: &str = "#60a5fa";

/// All records of one measurement file, each list sorted by timestamp
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    /// File stem of the database
    pub name: String,
    pub pings: Vec<PingResult>,
    pub speedtests: Vec<SpeedtestResult>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, mut pings: Vec<PingResult>, mut speedtests: Vec<SpeedtestResult>) -> Self {
        pings.sort_by_key(|ping| ping.timestamp);
        speedtests.sort_by_key(|speedtest| speedtest.timestamp);
        Self { name: name.into(), pings, speedtests }
    }

    pub fn ping_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.pings.first()?.timestamp, self.pings.last()?.timestamp))
    }

    pub fn speedtest_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.speedtests.first()?.timestamp, self.speedtests.last()?.timestamp))
    }
}

/// Every loaded dataset plus the presentation metadata derived from them
#[derive(Debug, Clone)]
pub struct DataBundle {
    pub datasets: Vec<Dataset>,
    /// Dataset name to human label
    pub labels: BTreeMap<String, String>,
    /// Dataset name to hex color
    pub colors: BTreeMap<String, String>,
    /// Datasets that have ping records, in load order
    pub order: Vec<String>,
}

impl DataBundle {
    /// Assign labels and colors. `labels` may name datasets in any case.
    pub fn new(datasets: Vec<Dataset>, labels: &BTreeMap<String, String>) -> Self {
        let order: Vec<String> = datasets
            .iter()
            .filter(|dataset| !dataset.pings.is_empty())
            .map(|dataset| dataset.name.clone())
            .collect();

        let lowercase: BTreeMap<String, &String> =
            labels.iter().map(|(name, label)| (name.to_lowercase(), label)).collect();
        let labels = order
            .iter()
            .map(|name| {
                let label = labels
                    .get(name)
                    .or_else(|| lowercase.get(&name.to_lowercase()).copied())
                    .cloned()
                    .unwrap_or_else(|| name.clone());
                (name.clone(), label)
            })
            .collect();

        let colors = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), PALETTE[i % PALETTE.len()].to_string()))
            .collect();

        Self { datasets, labels, colors, order }
    }

    pub fn label<'a>(&'a self, dataset: &'a str) -> &'a str {
        self.labels.get(dataset).map(String::as_str).unwrap_or(dataset)
    }

    pub fn color(&self, dataset: &str) -> &str {
        self.colors.get(dataset).map(String::as_str).unwrap_or(FALLBACK_COLOR)
    }

    pub fn ping_count(&self) -> usize {
        self.datasets.iter().map(|dataset| dataset.pings.len()).sum()
    }

    pub fn speedtest_count(&self) -> usize {
        self.datasets.iter().map(|dataset| dataset.speedtests.len()).sum()
    }

    /// Ping time span per dataset, ordered by dataset name
    pub fn ping_spans(&self) -> BTreeMap<&str, (DateTime<Utc>, DateTime<Utc>)> {
        self.datasets
            .iter()
            .filter_map(|dataset| Some((dataset.name.as_str(), dataset.ping_span()?)))
            .collect()
    }

    /// Distinct targets in order of first appearance
    pub fn target_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for ping in self.datasets.iter().flat_map(|dataset| &dataset.pings) {
            if !names.contains(&ping.target_name) {
                names.push(ping.target_name.clone());
            }
        }
        names
    }
}

/// Database files directly under `data_dir`, sorted by name
pub fn find_databases(data_dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    let entries = std::fs::read_dir(data_dir)
        .map_err(|source| ExportError::Io { path: data_dir.to_path_buf(), source })?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|source| ExportError::Io { path: data_dir.to_path_buf(), source })?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "db") {
            paths.push(path);
        }
    }
    paths.sort();

    if paths.is_empty() {
        return Err(ExportError::NoDatabases(data_dir.to_path_buf()));
    }
    Ok(paths)
}

/// Read one database file through its own reader handle.
pub async fn load_dataset(path: &Path) -> Result<Dataset, ExportError> {
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let store = Store::open_reader(path).await?;
    let pings = store.fetch_all_pings().await?.into_iter().map(|stored| stored.record).collect();
    let speedtests = store.fetch_all_speedtests().await?.into_iter().map(|stored| stored.record).collect();
    store.close();

    let dataset = Dataset::new(name, pings, speedtests);
    debug!(
        dataset = %dataset.name,
        pings = dataset.pings.len(),
        speedtests = dataset.speedtests.len(),
        "Loaded dataset"
    );
    Ok(dataset)
}

/// Load every `*.db` file in `data_dir` as one dataset each.
pub async fn load_data(data_dir: &Path, labels: &BTreeMap<String, String>) -> Result<DataBundle, ExportError> {
    let mut datasets = Vec::new();
    for path in find_databases(data_dir)? {
        datasets.push(load_dataset(&path).await?);
    }

    info!(datasets = datasets.len(), dir = %data_dir.display(), "Loaded measurement databases");
    Ok(DataBundle::new(datasets, labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::{ping, speedtest};

    #[test]
    fn test_bundle_assigns_palette_in_load_order() {
        let datasets = vec![
            Dataset::new("downstairs", vec![ping("google", 0, true)], Vec::new()),
            Dataset::new("empty", Vec::new(), vec![speedtest(0, Some(100.0))]),
            Dataset::new("Upstairs", vec![ping("google", 0, false)], Vec::new()),
        ];
        let labels = BTreeMap::from([
            ("downstairs".to_string(), "cable A, port B".to_string()),
            ("upstairs".to_string(), "cable B, port A".to_string()),
        ]);

        let bundle = DataBundle::new(datasets, &labels);

        assert_eq!(bundle.order, vec!["downstairs", "Upstairs"]);
        assert_eq!(bundle.color("downstairs"), PALETTE[0]);
        assert_eq!(bundle.color("Upstairs"), PALETTE[1]);
        assert_eq!(bundle.color("empty"), FALLBACK_COLOR);
        assert_eq!(bundle.label("Upstairs"), "cable B, port A");
        assert_eq!(bundle.label("empty"), "empty");
    }

    #[test]
    fn test_missing_databases_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let err = find_databases(dir.path()).unwrap_err();
        assert!(matches!(err, ExportError::NoDatabases(_)));
    }

    #[tokio::test]
    async fn test_load_data_reads_each_file() {
        let dir = tempfile::tempdir().unwrap();
        for (name, success) in [("b_site", false), ("a_site", true)] {
            let store = Store::open(dir.path().join(format!("{name}.db"))).await.unwrap();
            store.insert_ping(&ping("google", 0, success)).await.unwrap();
            store.insert_ping(&ping("google", 10, true)).await.unwrap();
            store.insert_speedtest(&speedtest(0, Some(50.0))).await.unwrap();
            store.close();
        }

        let bundle = load_data(dir.path(), &BTreeMap::new()).await.unwrap();

        assert_eq!(bundle.order, vec!["a_site", "b_site"]);
        assert_eq!(bundle.ping_count(), 4);
        assert_eq!(bundle.speedtest_count(), 2);
        assert!(!bundle.datasets[1].pings[0].success);
    }
}
