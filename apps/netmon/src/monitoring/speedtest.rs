//! Throughput probe driving an external speed-test client.
//!
//! Two client families are supported and they disagree on everything that
//! matters: command line flags, units and JSON layout.
//!
//! - the official Ookla client (`speedtest -f json`) reports nested
//!   `download.bandwidth` / `upload.bandwidth` in bytes per second and
//!   `ping.latency` in milliseconds;
//! - the community Python client (`speedtest-cli --json`) reports flat
//!   `download` / `upload` in bits per second and `ping` in milliseconds.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::runner::{CommandRunner, RunError};
use super::types::{SpeedtestResult, Throughput};

const VERSION_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const SERVER_LIST_TIMEOUT: Duration = Duration::from_secs(15);
const RAW_EXCERPT_CHARS: usize = 4000;

pub const NO_TOOL_ERROR: &str = "No speedtest CLI found (install Ookla speedtest or speedtest-cli)";

const PRIMARY_TOOL: &str = "speedtest";
const SECONDARY_TOOL: &str = "speedtest-cli";

/// Which client a `speedtest` binary turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedtestVariant {
    /// Official vendor client
    Ookla,
    /// Community Python client
    SpeedtestCli,
    Unknown,
}

impl SpeedtestVariant {
    /// Classify the output of `<tool> --version`.
    pub fn classify(version_output: &str) -> Self {
        let text = version_output.to_lowercase();
        if text.contains("ookla") {
            SpeedtestVariant::Ookla
        } else if text.contains("speedtest-cli") {
            SpeedtestVariant::SpeedtestCli
        } else {
            SpeedtestVariant::Unknown
        }
    }

    /// Tool name stored with each result
    pub fn tool_name(self) -> &'static str {
        match self {
            SpeedtestVariant::Ookla => PRIMARY_TOOL,
            SpeedtestVariant::SpeedtestCli | SpeedtestVariant::Unknown => SECONDARY_TOOL,
        }
    }

    /// Parse the machine readable report of this client.
    pub fn parse(self, output: &str) -> Option<Throughput> {
        match self {
            SpeedtestVariant::Ookla => parse_ookla_report(output),
            SpeedtestVariant::SpeedtestCli => parse_speedtest_cli_report(output),
            SpeedtestVariant::Unknown => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OoklaReport {
    download: Option<OoklaTransfer>,
    upload: Option<OoklaTransfer>,
    ping: Option<OoklaPing>,
}

#[derive(Debug, Deserialize)]
struct OoklaTransfer {
    /// Bytes per second
    bandwidth: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OoklaPing {
    latency: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SpeedtestCliReport {
    /// Bits per second
    download: Option<f64>,
    /// Bits per second
    upload: Option<f64>,
    ping: Option<f64>,
}

fn bytes_per_second_to_mbps(bytes_per_second: f64) -> f64 {
    bytes_per_second * 8.0 / 1_000_000.0
}

fn bits_per_second_to_mbps(bits_per_second: f64) -> f64 {
    bits_per_second / 1_000_000.0
}

pub fn parse_ookla_report(output: &str) -> Option<Throughput> {
    let report: OoklaReport = serde_json::from_str(output.trim()).ok()?;
    let throughput = Throughput {
        download_mbps: bytes_per_second_to_mbps(report.download?.bandwidth?),
        upload_mbps: bytes_per_second_to_mbps(report.upload?.bandwidth?),
        ping_ms: report.ping?.latency?,
    };
    throughput.is_finite().then_some(throughput)
}

pub fn parse_speedtest_cli_report(output: &str) -> Option<Throughput> {
    let report: SpeedtestCliReport = serde_json::from_str(output.trim()).ok()?;
    let throughput = Throughput {
        download_mbps: bits_per_second_to_mbps(report.download?),
        upload_mbps: bits_per_second_to_mbps(report.upload?),
        ping_ms: report.ping?,
    };
    throughput.is_finite().then_some(throughput)
}

/// First server id in a `speedtest-cli --list` listing.
///
/// Lines look like `12345) Some ISP (City, CC) [1.23 km]` and are sorted by
/// distance, so the first one is the nearest server.
pub fn parse_server_list(listing: &str) -> Option<String> {
    listing
        .lines()
        .map(str::trim)
        .find(|line| line.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .and_then(|line| line.split(')').next())
        .and_then(|head| head.split_whitespace().next())
        .map(str::to_string)
}

fn raw_excerpt(output: &str) -> String {
    let excerpt: String = output.chars().take(RAW_EXCERPT_CHARS).collect();
    let excerpt = excerpt.trim().replace('\n', " ");
    if excerpt.is_empty() { "empty".to_string() } else { excerpt }
}

/// Finds speed-test binaries on disk.
#[derive(Debug, Clone)]
pub struct ToolLocator {
    /// Checked first for the primary tool, in order
    preferred: Vec<PathBuf>,
    /// PATH-style lookup directories
    search_dirs: Vec<PathBuf>,
}

impl ToolLocator {
    pub fn new(preferred: Vec<PathBuf>, search_dirs: Vec<PathBuf>) -> Self {
        Self { preferred, search_dirs }
    }

    /// Well-known install locations, then `$PATH`, then `~/.local/bin`.
    pub fn system() -> Self {
        let preferred = ["/usr/bin/speedtest", "/usr/local/bin/speedtest", "/opt/homebrew/bin/speedtest"]
            .into_iter()
            .map(PathBuf::from)
            .collect();

        let mut search_dirs: Vec<PathBuf> = std::env::var_os("PATH")
            .map(|path| std::env::split_paths(&path).collect())
            .unwrap_or_default();
        if let Some(home) = std::env::home_dir() {
            search_dirs.push(home.join(".local").join("bin"));
        }

        Self { preferred, search_dirs }
    }

    /// The `speedtest` binary, preferring the well-known locations.
    pub fn primary(&self) -> Option<PathBuf> {
        self.preferred.iter().find(|path| is_executable(path)).cloned().or_else(|| self.which(PRIMARY_TOOL))
    }

    /// The `speedtest-cli` binary.
    pub fn secondary(&self) -> Option<PathBuf> {
        self.which(SECONDARY_TOOL)
    }

    fn which(&self, exe: &str) -> Option<PathBuf> {
        self.search_dirs.iter().find_map(|dir| {
            let candidate = dir.join(exe);
            if is_executable(&candidate) {
                return Some(candidate);
            }
            if cfg!(windows) {
                let candidate = dir.join(format!("{exe}.exe"));
                if is_executable(&candidate) {
                    return Some(candidate);
                }
            }
            None
        })
    }
}

/// A regular file we may run; on unix at least one execute bit must be set.
fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = path.metadata() else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// A fully resolved speed-test command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub variant: SpeedtestVariant,
    pub argv: Vec<String>,
}

impl Invocation {
    fn ookla(exe: &Path, server: Option<&str>) -> Self {
        let mut argv = vec![
            exe.display().to_string(),
            "--accept-license".into(),
            "--accept-gdpr".into(),
            "-f".into(),
            "json".into(),
        ];
        if let Some(server) = server {
            argv.extend(["--server-id".into(), server.to_string()]);
        }
        Self { variant: SpeedtestVariant::Ookla, argv }
    }

    fn speedtest_cli(exe: &Path, server: Option<&str>) -> Self {
        let mut argv = vec![exe.display().to_string(), "--json".into(), "--secure".into()];
        if let Some(server) = server {
            argv.extend(["--server".into(), server.to_string()]);
        }
        Self { variant: SpeedtestVariant::SpeedtestCli, argv }
    }

    pub fn tool_name(&self) -> &'static str {
        self.variant.tool_name()
    }
}

/// Throughput probe.
///
/// A server picked automatically is remembered for the lifetime of this
/// instance; build a new instance to pick again.
pub struct SpeedTester {
    timeout: Duration,
    server_id: Option<String>,
    resolved_server: Option<String>,
    locator: ToolLocator,
    runner: Arc<dyn CommandRunner>,
}

impl SpeedTester {
    pub fn new(timeout: Duration, server_id: Option<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            timeout,
            server_id: server_id.filter(|id| !id.is_empty()),
            resolved_server: None,
            locator: ToolLocator::system(),
            runner,
        }
    }

    pub fn with_locator(mut self, locator: ToolLocator) -> Self {
        self.locator = locator;
        self
    }

    /// Server chosen by auto-resolution, if any
    pub fn resolved_server(&self) -> Option<&str> {
        self.resolved_server.as_deref()
    }

    /// Run one throughput measurement. Never fails: every problem becomes a
    /// failed result.
    pub async fn run(&mut self) -> SpeedtestResult {
        let invocation = self.pick_command().await;
        let timestamp = Utc::now();

        let Some(invocation) = invocation else {
            return SpeedtestResult::failure(timestamp, None, NO_TOOL_ERROR);
        };
        let tool = invocation.tool_name();
        debug!(tool, argv = ?invocation.argv, "Running speedtest");

        let output = match self.runner.run(&invocation.argv, self.timeout).await {
            Ok(output) => output,
            Err(RunError::TimedOut(_)) => {
                return SpeedtestResult::failure(timestamp, Some(tool), "speedtest timed out");
            }
            Err(e) => return SpeedtestResult::failure(timestamp, Some(tool), e.to_string()),
        };

        let text = output.combined();
        if !output.success() {
            let error = match text.trim() {
                "" => format!("speedtest failed with code {}", output.code_label()),
                trimmed => trimmed.to_string(),
            };
            return SpeedtestResult::failure(timestamp, Some(tool), error);
        }

        match invocation.variant.parse(&text) {
            Some(throughput) => SpeedtestResult::success(timestamp, tool, throughput),
            None => SpeedtestResult::failure(
                timestamp,
                Some(tool),
                format!("Could not parse speedtest output; raw: {}", raw_excerpt(&text)),
            ),
        }
    }

    /// Discover the installed client and build its command line.
    pub async fn pick_command(&mut self) -> Option<Invocation> {
        let primary = self.locator.primary();
        let variant = match &primary {
            Some(path) => Some(self.detect_variant(path).await),
            None => None,
        };
        let secondary = self.locator.secondary();
        debug!(?primary, ?variant, ?secondary, "Speedtest tool discovery");

        let wants_resolution = variant == Some(SpeedtestVariant::SpeedtestCli)
            || (variant.is_none() && secondary.is_some());
        if self.server_id.is_none() && self.resolved_server.is_none() && wants_resolution {
            if let Some(exe) = primary.as_ref().or(secondary.as_ref()) {
                if let Some(server) = self.resolve_server(exe).await {
                    info!(server = %server, "Auto-selected nearest speedtest server");
                    self.resolved_server = Some(server);
                }
            }
        }
        let server = self.server_id.as_deref().or(self.resolved_server.as_deref());

        match (variant, primary, secondary) {
            (Some(SpeedtestVariant::Ookla), Some(exe), _) => Some(Invocation::ookla(&exe, server)),
            (Some(SpeedtestVariant::SpeedtestCli), Some(exe), _) => {
                Some(Invocation::speedtest_cli(&exe, server))
            }
            (_, _, Some(cli)) => Some(Invocation::speedtest_cli(&cli, server)),
            _ => None,
        }
    }

    async fn detect_variant(&self, exe: &Path) -> SpeedtestVariant {
        let argv = vec![exe.display().to_string(), "--version".into()];
        match self.runner.run(&argv, VERSION_QUERY_TIMEOUT).await {
            Ok(output) => SpeedtestVariant::classify(&output.combined()),
            Err(e) => {
                warn!(exe = %exe.display(), "Failed to query speedtest version: {}", e);
                SpeedtestVariant::Unknown
            }
        }
    }

    async fn resolve_server(&self, exe: &Path) -> Option<String> {
        let argv = vec![exe.display().to_string(), "--secure".into(), "--list".into()];
        match self.runner.run(&argv, self.timeout.min(SERVER_LIST_TIMEOUT)).await {
            Ok(output) => parse_server_list(&output.stdout),
            Err(e) => {
                warn!("Failed to list speedtest servers: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::monitoring::runner::fake::{FakeRunner, Reply};

    const OOKLA_JSON: &str =
        r#"{"download":{"bandwidth":12500000},"upload":{"bandwidth":1250000},"ping":{"latency":15.2}}"#;
    const CLI_JSON: &str = r#"{"download":100000000,"upload":10000000,"ping":15.2}"#;
    const SERVER_LIST: &str = "Retrieving speedtest.net configuration...\n\
        \n  12345) Example ISP (Springfield, US) [3.10 km]\n\
        67890) Other ISP (Shelbyville, US) [12.40 km]\n";

    struct Bin {
        _dir: tempfile::TempDir,
        path: PathBuf,
    }

    impl Bin {
        fn with(tools: &[&str]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("bin");
            fs::create_dir_all(&path).unwrap();
            for tool in tools {
                fs::write(path.join(tool), "").unwrap();
                set_mode(&path.join(tool), 0o755);
            }
            Self { _dir: dir, path }
        }

        fn locator(&self) -> ToolLocator {
            ToolLocator::new(Vec::new(), vec![self.path.clone()])
        }

        fn tool(&self, name: &str) -> String {
            self.path.join(name).display().to_string()
        }
    }

    #[cfg(unix)]
    fn set_mode(path: &Path, mode: u32) {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[cfg(not(unix))]
    fn set_mode(_path: &Path, _mode: u32) {}

    fn tester(bin: &Bin, runner: Arc<FakeRunner>, server: Option<&str>) -> SpeedTester {
        SpeedTester::new(Duration::from_secs(90), server.map(str::to_string), runner)
            .with_locator(bin.locator())
    }

    #[test]
    fn test_parse_ookla_report() {
        let throughput = parse_ookla_report(OOKLA_JSON).unwrap();
        assert_eq!(throughput.download_mbps, 100.0);
        assert_eq!(throughput.upload_mbps, 10.0);
        assert_eq!(throughput.ping_ms, 15.2);
    }

    #[test]
    fn test_parse_speedtest_cli_report() {
        let throughput = parse_speedtest_cli_report(CLI_JSON).unwrap();
        assert_eq!(throughput.download_mbps, 100.0);
        assert_eq!(throughput.upload_mbps, 10.0);
        assert_eq!(throughput.ping_ms, 15.2);
    }

    #[test]
    fn test_reports_are_not_interchangeable() {
        assert!(parse_ookla_report(CLI_JSON).is_none());
        assert!(parse_speedtest_cli_report(OOKLA_JSON).is_none());
        assert!(parse_ookla_report(r#"{"download":{"bandwidth":1},"upload":{"bandwidth":1}}"#).is_none());
        assert!(parse_speedtest_cli_report("not json").is_none());
    }

    #[test]
    fn test_classify_version_output() {
        assert_eq!(
            SpeedtestVariant::classify("Speedtest by Ookla 1.2.0.84 (ea6b6773cf)"),
            SpeedtestVariant::Ookla
        );
        assert_eq!(SpeedtestVariant::classify("speedtest-cli 2.1.3\nPython 3.11.4"), SpeedtestVariant::SpeedtestCli);
        assert_eq!(SpeedtestVariant::classify("something else"), SpeedtestVariant::Unknown);
    }

    #[test]
    fn test_parse_server_list_picks_first_server() {
        assert_eq!(parse_server_list(SERVER_LIST).as_deref(), Some("12345"));
        assert_eq!(parse_server_list("Retrieving...\nno servers"), None);
    }

    #[test]
    fn test_preferred_location_wins_over_path() {
        let preferred = Bin::with(&["speedtest"]);
        let on_path = Bin::with(&["speedtest"]);
        let locator = ToolLocator::new(vec![preferred.path.join("speedtest")], vec![on_path.path.clone()]);
        assert_eq!(locator.primary(), Some(preferred.path.join("speedtest")));

        let locator = ToolLocator::new(vec![PathBuf::from("/nonexistent/speedtest")], vec![on_path.path.clone()]);
        assert_eq!(locator.primary(), Some(on_path.path.join("speedtest")));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_file_is_skipped() {
        let shadowing = Bin::with(&["speedtest", "speedtest-cli"]);
        set_mode(&shadowing.path.join("speedtest"), 0o644);
        set_mode(&shadowing.path.join("speedtest-cli"), 0o644);
        let usable = Bin::with(&["speedtest", "speedtest-cli"]);

        let locator = ToolLocator::new(
            vec![shadowing.path.join("speedtest")],
            vec![shadowing.path.clone(), usable.path.clone()],
        );
        assert_eq!(locator.primary(), Some(usable.path.join("speedtest")));
        assert_eq!(locator.secondary(), Some(usable.path.join("speedtest-cli")));

        let locator = ToolLocator::new(Vec::new(), vec![shadowing.path.clone()]);
        assert_eq!(locator.primary(), None);
    }

    #[tokio::test]
    async fn test_no_tool_found() {
        let bin = Bin::with(&[]);
        let runner = Arc::new(FakeRunner::new());
        let result = tester(&bin, runner.clone(), None).run().await;

        assert!(!result.success);
        assert_eq!(result.tool, None);
        assert_eq!(result.error.as_deref(), Some(NO_TOOL_ERROR));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ookla_run_with_configured_server() {
        let bin = Bin::with(&["speedtest"]);
        let runner = Arc::new(
            FakeRunner::new()
                .on(&["--version"], Reply::ok("Speedtest by Ookla 1.2.0"))
                .on(&["-f", "json"], Reply::ok(OOKLA_JSON)),
        );
        let result = tester(&bin, runner.clone(), Some("4242")).run().await;

        assert!(result.success);
        assert_eq!(result.tool.as_deref(), Some("speedtest"));
        assert_eq!(result.download_mbps, Some(100.0));
        assert_eq!(result.upload_mbps, Some(10.0));
        assert_eq!(result.ping_ms, Some(15.2));

        let calls = runner.calls();
        let run = calls.last().unwrap();
        assert_eq!(run[0], bin.tool("speedtest"));
        assert!(run.windows(2).any(|pair| pair == ["--server-id", "4242"]));
        assert_eq!(runner.calls_containing("--list"), 0);
    }

    #[tokio::test]
    async fn test_python_variant_resolves_server_once() {
        let bin = Bin::with(&["speedtest"]);
        let runner = Arc::new(
            FakeRunner::new()
                .on(&["--version"], Reply::ok("speedtest-cli 2.1.3"))
                .on(&["--list"], Reply::ok(SERVER_LIST))
                .on(&["--json"], Reply::ok(CLI_JSON)),
        );
        let mut tester = tester(&bin, runner.clone(), None);

        let first = tester.run().await;
        let second = tester.run().await;

        assert!(first.success && second.success);
        assert_eq!(first.tool.as_deref(), Some("speedtest-cli"));
        assert_eq!(tester.resolved_server(), Some("12345"));
        assert_eq!(runner.calls_containing("--list"), 1);
        assert!(
            runner.calls().last().unwrap().windows(2).any(|pair| pair == ["--server", "12345"])
        );
    }

    #[tokio::test]
    async fn test_secondary_tool_only() {
        let bin = Bin::with(&["speedtest-cli"]);
        let runner = Arc::new(
            FakeRunner::new()
                .on(&["--list"], Reply::ok("no servers listed"))
                .on(&["--json"], Reply::ok(CLI_JSON)),
        );
        let mut tester = tester(&bin, runner.clone(), None);
        let result = tester.run().await;

        assert!(result.success);
        assert_eq!(result.tool.as_deref(), Some("speedtest-cli"));
        assert_eq!(tester.resolved_server(), None);
        assert_eq!(runner.calls_containing("--version"), 0);
        let run = runner.calls().last().unwrap().clone();
        assert_eq!(run, vec![bin.tool("speedtest-cli"), "--json".into(), "--secure".into()]);
    }

    #[tokio::test]
    async fn test_unknown_primary_without_secondary_is_not_found() {
        let bin = Bin::with(&["speedtest"]);
        let runner = Arc::new(FakeRunner::new().on(&["--version"], Reply::ok("mystery tool 0.1")));
        let result = tester(&bin, runner, None).run().await;

        assert_eq!(result.error.as_deref(), Some(NO_TOOL_ERROR));
    }

    #[tokio::test]
    async fn test_unparseable_output_despite_clean_exit() {
        let bin = Bin::with(&["speedtest"]);
        let garbage = format!("line one\n{}", "x".repeat(5000));
        let runner = Arc::new(
            FakeRunner::new()
                .on(&["--version"], Reply::ok("Speedtest by Ookla"))
                .on(&["-f"], Reply::ok(&garbage)),
        );
        let result = tester(&bin, runner, None).run().await;

        assert!(!result.success);
        assert!(result.throughput().is_none());
        let error = result.error.unwrap();
        assert!(error.starts_with("Could not parse speedtest output; raw: line one xxx"));
        assert!(error.len() <= "Could not parse speedtest output; raw: ".len() + 4000);
    }

    #[tokio::test]
    async fn test_incomplete_report_is_failure() {
        let bin = Bin::with(&["speedtest"]);
        let runner = Arc::new(
            FakeRunner::new()
                .on(&["--version"], Reply::ok("Speedtest by Ookla"))
                .on(&["-f"], Reply::ok(r#"{"download":{"bandwidth":1},"upload":{"bandwidth":1}}"#)),
        );
        let result = tester(&bin, runner, None).run().await;

        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Could not parse speedtest output"));
    }

    #[tokio::test]
    async fn test_timeout_and_nonzero_exit() {
        let bin = Bin::with(&["speedtest"]);
        let timed_out = Arc::new(
            FakeRunner::new()
                .on(&["--version"], Reply::ok("Speedtest by Ookla"))
                .on(&["-f"], Reply::TimedOut),
        );
        let result = tester(&bin, timed_out, None).run().await;
        assert_eq!(result.error.as_deref(), Some("speedtest timed out"));
        assert_eq!(result.tool.as_deref(), Some("speedtest"));

        let failing = Arc::new(
            FakeRunner::new()
                .on(&["--version"], Reply::ok("Speedtest by Ookla"))
                .on(&["-f"], Reply::exit(2, "", "")),
        );
        let result = tester(&bin, failing, None).run().await;
        assert_eq!(result.error.as_deref(), Some("speedtest failed with code 2"));
    }
}
