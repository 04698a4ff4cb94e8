//! Compilation stability detection
//!
//! The editor rebuilds in the background, so there is no "build finished"
//! event to wait for. Instead the monitor compares the newest source file
//! against the newest build artifact and declares the build stable once the
//! artifacts are at least as new as the sources *and* nothing has been written
//! for a full stability window.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

use crate::config::{CompilationConfig, WatchedTree};
use crate::errors::DiagError;
use crate::report::DiagnosticsFormatter;

/// Modification times for tracked sources and build artifacts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompilationSnapshot {
    pub sources: BTreeMap<PathBuf, SystemTime>,
    pub artifacts: BTreeMap<PathBuf, SystemTime>,
}

fn newest(times: &BTreeMap<PathBuf, SystemTime>) -> SystemTime {
    times.values().copied().max().unwrap_or(UNIX_EPOCH)
}

impl CompilationSnapshot {
    pub fn newest_source(&self) -> SystemTime {
        newest(&self.sources)
    }

    pub fn newest_artifact(&self) -> SystemTime {
        newest(&self.artifacts)
    }

    /// Sources modified after `since`, sorted lexicographically.
    pub fn sources_modified_after(&self, since: SystemTime) -> Vec<PathBuf> {
        // PathBuf ordering compares components, so `a/b` would sort before `a.b/c`.
        let mut pending: Vec<PathBuf> = self
            .sources
            .iter()
            .filter(|(_, modified)| **modified > since)
            .map(|(path, _)| path.clone())
            .collect();
        pending.sort_by(|a, b| a.to_string_lossy().cmp(&b.to_string_lossy()));
        pending
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StabilityVerdict {
    Stable { artifact_age: Duration },
    /// Artifacts are current but were written inside the stability window.
    Settling { remaining: Duration },
    /// Some sources are newer than every artifact.
    Outdated { pending: Vec<PathBuf> },
    /// Nothing has been built yet.
    NoArtifacts { pending: Vec<PathBuf> },
}

impl StabilityVerdict {
    pub fn is_stable(&self) -> bool {
        matches!(self, StabilityVerdict::Stable { .. })
    }

    pub fn pending(&self) -> Option<&[PathBuf]> {
        match self {
            StabilityVerdict::Outdated { pending } | StabilityVerdict::NoArtifacts { pending } => {
                Some(pending)
            }
            _ => None,
        }
    }
}

/// Decide whether the build described by `snapshot` is stable at `now`.
pub fn evaluate(snapshot: &CompilationSnapshot, now: SystemTime, window: Duration) -> StabilityVerdict {
    let newest_artifact = snapshot.newest_artifact();
    if snapshot.artifacts.is_empty() {
        return StabilityVerdict::NoArtifacts {
            pending: snapshot.sources_modified_after(newest_artifact),
        };
    }

    if newest_artifact < snapshot.newest_source() {
        return StabilityVerdict::Outdated {
            pending: snapshot.sources_modified_after(newest_artifact),
        };
    }

    let artifact_age = now.duration_since(newest_artifact).unwrap_or(Duration::ZERO);
    if artifact_age >= window {
        StabilityVerdict::Stable { artifact_age }
    } else {
        StabilityVerdict::Settling {
            remaining: window - artifact_age,
        }
    }
}

pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> CompilationSnapshot;
}

/// Scans watched directories on disk. Paths are recorded relative to the
/// project root; unreadable entries are skipped.
pub struct FsSnapshotSource {
    root: PathBuf,
    sources: Vec<WatchedTree>,
    artifacts: Vec<WatchedTree>,
}

impl FsSnapshotSource {
    pub fn new(root: PathBuf, sources: Vec<WatchedTree>, artifacts: Vec<WatchedTree>) -> Self {
        Self {
            root,
            sources,
            artifacts,
        }
    }

    pub fn from_config(config: &CompilationConfig) -> Self {
        Self::new(
            config.project_root.clone(),
            config.sources.clone(),
            config.artifacts.clone(),
        )
    }

    fn scan(&self, trees: &[WatchedTree]) -> BTreeMap<PathBuf, SystemTime> {
        let mut times = BTreeMap::new();
        for tree in trees {
            let dir = self.root.join(&tree.dir);
            let wanted = tree.extension.trim_start_matches('.');
            for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() || !has_extension(entry.path(), wanted) {
                    continue;
                }
                let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
                    continue;
                };
                let path = entry
                    .path()
                    .strip_prefix(&self.root)
                    .unwrap_or(entry.path())
                    .to_path_buf();
                times.insert(path, modified);
            }
        }
        times
    }
}

fn has_extension(path: &Path, wanted: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case(wanted))
}

impl SnapshotSource for FsSnapshotSource {
    fn snapshot(&self) -> CompilationSnapshot {
        CompilationSnapshot {
            sources: self.scan(&self.sources),
            artifacts: self.scan(&self.artifacts),
        }
    }
}

/// Decides when the pending-file list is worth printing again: only when its
/// size differs from the previous tick.
#[derive(Debug, Default)]
pub struct PendingTracker {
    last_count: Option<usize>,
}

impl PendingTracker {
    pub fn observe(&mut self, pending: &[PathBuf]) -> bool {
        let changed = self.last_count != Some(pending.len());
        self.last_count = Some(pending.len());
        changed
    }
}

/// Step between printed "remaining" lines while the build settles.
const SETTLE_REPORT_STEP_SECS: u64 = 10;

/// Throttles the settling countdown to one line per ten-second step.
#[derive(Debug, Default)]
pub struct SettleTracker {
    last_step: Option<u64>,
}

impl SettleTracker {
    pub fn observe(&mut self, remaining: Duration) -> bool {
        let step = remaining.as_secs() / SETTLE_REPORT_STEP_SECS;
        let changed = self.last_step != Some(step);
        self.last_step = Some(step);
        changed
    }

    pub fn reset(&mut self) {
        self.last_step = None;
    }
}

pub struct StabilityMonitor<S: SnapshotSource> {
    source: S,
    window: Duration,
    interval: Duration,
    timeout: Duration,
    clock: fn() -> SystemTime,
    formatter: DiagnosticsFormatter,
}

impl<S: SnapshotSource> StabilityMonitor<S> {
    pub fn new(source: S, window: Duration, interval: Duration, timeout: Duration) -> Self {
        Self {
            source,
            window,
            interval,
            timeout,
            clock: SystemTime::now,
            formatter: DiagnosticsFormatter::plain(),
        }
    }

    pub fn with_formatter(mut self, formatter: DiagnosticsFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> SystemTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn check(&self) -> StabilityVerdict {
        evaluate(&self.source.snapshot(), (self.clock)(), self.window)
    }

    /// Poll until the build is stable, returning the age of the newest artifact.
    pub async fn wait_until_stable(&self) -> Result<Duration, DiagError> {
        println!("{}", self.formatter.step("Monitoring compilation status..."));
        let started = tokio::time::Instant::now();
        let mut tracker = PendingTracker::default();
        let mut settle = SettleTracker::default();

        loop {
            let verdict = self.check();
            match &verdict {
                StabilityVerdict::Stable { artifact_age } => {
                    println!(
                        "{}",
                        self.formatter.ok(&format!(
                            "Build is up to date and stable (artifact age: {}s).",
                            artifact_age.as_secs()
                        ))
                    );
                    return Ok(*artifact_age);
                }
                StabilityVerdict::Settling { remaining } => {
                    log::debug!("Build settling, {}s of quiet time left", remaining.as_secs());
                    if settle.observe(*remaining) {
                        println!(
                            "{}",
                            self.formatter.info(&format!(
                                "      Waiting to ensure build completion... ({}s remaining)",
                                remaining.as_secs()
                            ))
                        );
                    }
                }
                StabilityVerdict::Outdated { pending } | StabilityVerdict::NoArtifacts { pending } => {
                    settle.reset();
                    if tracker.observe(pending) {
                        if matches!(verdict, StabilityVerdict::NoArtifacts { .. }) {
                            println!("{}", self.formatter.warn("No build artifacts found yet."));
                        }
                        println!("{}", self.formatter.pending_files(pending));
                    }
                }
            }

            if started.elapsed() >= self.timeout {
                log::error!(
                    "Compilation still not stable after {}s",
                    self.timeout.as_secs()
                );
                return Err(DiagError::CompilationTimeout(self.timeout.as_secs()));
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use std::sync::Mutex;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn snapshot(sources: &[(&str, u64)], artifacts: &[(&str, u64)]) -> CompilationSnapshot {
        CompilationSnapshot {
            sources: sources.iter().map(|(p, t)| (PathBuf::from(p), at(*t))).collect(),
            artifacts: artifacts.iter().map(|(p, t)| (PathBuf::from(p), at(*t))).collect(),
        }
    }

    #[test]
    fn test_stable_when_artifacts_newer_and_quiet() {
        let snap = snapshot(&[("a.cs", 100)], &[("a.dll", 120)]);
        let verdict = evaluate(&snap, at(200), Duration::from_secs(60));
        assert_eq!(
            verdict,
            StabilityVerdict::Stable {
                artifact_age: Duration::from_secs(80)
            }
        );
    }

    #[test]
    fn test_settling_inside_window() {
        let snap = snapshot(&[("a.cs", 100)], &[("a.dll", 120)]);
        let verdict = evaluate(&snap, at(150), Duration::from_secs(60));
        assert_eq!(
            verdict,
            StabilityVerdict::Settling {
                remaining: Duration::from_secs(30)
            }
        );
    }

    #[test]
    fn test_equal_times_count_as_up_to_date() {
        let snap = snapshot(&[("a.cs", 100)], &[("a.dll", 100)]);
        assert!(evaluate(&snap, at(160), Duration::from_secs(60)).is_stable());
    }

    #[test]
    fn test_outdated_lists_sorted_pending_sources() {
        let snap = snapshot(
            &[("b/Zeta.cs", 300), ("a/Alpha.cs", 250), ("old.cs", 50)],
            &[("x.dll", 200), ("y.dll", 100)],
        );
        let verdict = evaluate(&snap, at(10_000), Duration::from_secs(60));
        assert_eq!(
            verdict.pending().unwrap(),
            &[PathBuf::from("a/Alpha.cs"), PathBuf::from("b/Zeta.cs")]
        );
        assert!(!verdict.is_stable());
    }

    #[test]
    fn test_pending_sources_sort_by_path_text() {
        let snap = snapshot(&[("a/b.cs", 300), ("a.b/c.cs", 300)], &[("x.dll", 200)]);
        let verdict = evaluate(&snap, at(10_000), Duration::from_secs(60));
        assert_eq!(
            verdict.pending().unwrap(),
            &[PathBuf::from("a.b/c.cs"), PathBuf::from("a/b.cs")]
        );
    }

    #[test]
    fn test_no_artifacts_never_stable() {
        let snap = snapshot(&[("a.cs", 1)], &[]);
        let verdict = evaluate(&snap, at(1_000_000), Duration::ZERO);
        assert!(matches!(verdict, StabilityVerdict::NoArtifacts { .. }));

        let empty = CompilationSnapshot::default();
        assert!(!evaluate(&empty, at(1_000_000), Duration::ZERO).is_stable());
    }

    #[test]
    fn test_shrinking_window_never_delays_stability() {
        let snap = snapshot(&[("a.cs", 100)], &[("a.dll", 130)]);
        for now in (130..260).step_by(7) {
            for wide in 0..90u64 {
                for narrow in 0..=wide {
                    let wide_stable =
                        evaluate(&snap, at(now), Duration::from_secs(wide)).is_stable();
                    let narrow_stable =
                        evaluate(&snap, at(now), Duration::from_secs(narrow)).is_stable();
                    assert!(!wide_stable || narrow_stable);
                }
            }
        }
    }

    #[test]
    fn test_pending_tracker_reports_size_changes_only() {
        let mut tracker = PendingTracker::default();
        let one = vec![PathBuf::from("a.cs")];
        let two = vec![PathBuf::from("a.cs"), PathBuf::from("b.cs")];
        assert!(tracker.observe(&one));
        assert!(!tracker.observe(&one));
        assert!(tracker.observe(&two));
        assert!(!tracker.observe(&two));
        assert!(tracker.observe(&[]));
    }

    #[test]
    fn test_settle_tracker_prints_once_per_step() {
        let mut settle = SettleTracker::default();
        let printed: Vec<u64> = (0..=60)
            .rev()
            .filter(|secs| settle.observe(Duration::from_secs(*secs)))
            .collect();
        assert_eq!(printed, vec![60, 59, 49, 39, 29, 19, 9]);

        settle.reset();
        assert!(settle.observe(Duration::from_secs(5)));
        assert!(!settle.observe(Duration::from_secs(3)));
    }

    #[test]
    fn test_fs_snapshot_scans_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = dir.path().join("Assets/Scripts/Units");
        let library = dir.path().join("Library/ScriptAssemblies");
        fs::create_dir_all(&scripts).unwrap();
        fs::create_dir_all(&library).unwrap();
        fs::write(scripts.join("Unit.cs"), "class Unit {}").unwrap();
        fs::write(scripts.join("Unit.cs.meta"), "guid").unwrap();
        fs::write(library.join("Assembly-CSharp.dll"), "bin").unwrap();
        set_file_mtime(scripts.join("Unit.cs"), FileTime::from_unix_time(1_000, 0)).unwrap();
        set_file_mtime(
            library.join("Assembly-CSharp.dll"),
            FileTime::from_unix_time(2_000, 0),
        )
        .unwrap();

        let source = FsSnapshotSource::from_config(&CompilationConfig {
            project_root: dir.path().to_path_buf(),
            ..CompilationConfig::default()
        });
        let snap = source.snapshot();
        assert_eq!(snap.sources.len(), 1);
        assert!(snap
            .sources
            .contains_key(&PathBuf::from("Assets/Scripts/Units/Unit.cs")));
        assert_eq!(snap.newest_artifact(), at(2_000));
        assert!(evaluate(&snap, at(2_100), Duration::from_secs(60)).is_stable());
    }

    struct ScriptedSnapshots {
        snapshots: Mutex<Vec<CompilationSnapshot>>,
    }

    impl SnapshotSource for ScriptedSnapshots {
        fn snapshot(&self) -> CompilationSnapshot {
            let mut snapshots = self.snapshots.lock().unwrap();
            if snapshots.len() > 1 {
                snapshots.remove(0)
            } else {
                snapshots[0].clone()
            }
        }
    }

    fn fixed_now() -> SystemTime {
        at(10_000)
    }

    #[tokio::test]
    async fn test_monitor_waits_for_rebuild() {
        let source = ScriptedSnapshots {
            snapshots: Mutex::new(vec![
                snapshot(&[("a.cs", 9_000)], &[("a.dll", 8_000)]),
                snapshot(&[("a.cs", 9_000)], &[("a.dll", 9_950)]),
                snapshot(&[("a.cs", 9_000)], &[("a.dll", 9_900)]),
            ]),
        };
        let monitor = StabilityMonitor::new(
            source,
            Duration::from_secs(60),
            Duration::from_millis(1),
            Duration::from_secs(5),
        )
        .with_clock(fixed_now);

        let age = monitor.wait_until_stable().await.unwrap();
        assert_eq!(age, Duration::from_secs(100));
    }

    #[tokio::test]
    async fn test_monitor_times_out_without_artifacts() {
        let source = ScriptedSnapshots {
            snapshots: Mutex::new(vec![snapshot(&[("a.cs", 9_000)], &[])]),
        };
        let monitor = StabilityMonitor::new(
            source,
            Duration::ZERO,
            Duration::from_millis(5),
            Duration::from_millis(20),
        )
        .with_clock(fixed_now);

        let err = monitor.wait_until_stable().await.unwrap_err();
        assert!(matches!(err, DiagError::CompilationTimeout(_)));
        assert!(!err.is_retryable());
    }
}
