//! Ramping-user load generator for a running timetable server.
//!
//! Virtual users are started and stopped to follow a piecewise-linear user
//! target. Each user loops through a fixed scenario (health, timetable API,
//! metrics scrape, list again) with pauses between calls. Every response is
//! timed; the run ends with a summary and a pass/fail verdict against the
//! latency and error-rate thresholds.

use std::{
    fmt,
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    anyhow::bail,
    clap::Args,
    rand::Rng,
    serde_json::json,
    tokio::task::JoinHandle,
    tracing::{debug, info, warn},
};

/// p95 latency must stay under this many milliseconds.
const P95_THRESHOLD_MS: f64 = 500.0;
/// p99 latency must stay under this many milliseconds.
const P99_THRESHOLD_MS: f64 = 1000.0;
/// Share of failed requests must stay under this rate.
const FAILURE_RATE_THRESHOLD: f64 = 0.1;

/// How often the user target is re-evaluated.
const TICK: Duration = Duration::from_millis(250);
/// How long running iterations may take to finish once the last stage ends.
const GRACEFUL_STOP: Duration = Duration::from_secs(30);

const WEEKDAYS: [&str; 5] = ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"];

#[derive(Debug, Args)]
pub struct LoadTestArgs {
    /// Base URL of the server under test.
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:3000")]
    pub base_url: String,

    /// Ramp stage as DURATION:TARGET (e.g. `1m:10`, `30s:0`). Repeatable.
    /// Defaults to the light/medium/heavy profile.
    #[arg(long = "stage", value_parser = parse_stage)]
    pub stages: Vec<Stage>,
}

/// Move linearly from the previous stage's user count to `target` over
/// `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (duration, target) = s
            .split_once(':')
            .ok_or_else(|| format!("expected DURATION:TARGET, got {s:?}"))?;
        Ok(Self {
            duration: parse_duration(duration)?,
            target: target
                .trim()
                .parse()
                .map_err(|e| format!("invalid target {target:?}: {e}"))?,
        })
    }
}

fn parse_stage(s: &str) -> Result<Stage, String> {
    s.parse()
}

/// Parse durations like `30s`, `1m`, `1m30s`, `2h` or bare seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let mut total = 0u64;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            _ => return Err(format!("invalid duration {s:?}")),
        };
        let n: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration {s:?}"))?;
        total = n
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| format!("duration {s:?} is too long"))?;
        digits.clear();
    }
    if !digits.is_empty() || s.is_empty() {
        return Err(format!("invalid duration {s:?}"));
    }
    Ok(Duration::from_secs(total))
}

/// Light, medium and heavy plateaus with ramps in between. The three user
/// levels come from `STAGE_1_USERS`, `STAGE_2_USERS` and `STAGE_3_USERS`.
pub fn default_stages(lookup: impl Fn(&str) -> Option<String>) -> Vec<Stage> {
    let users = |name: &str, default: usize| {
        lookup(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    };
    let light = users("STAGE_1_USERS", 10);
    let medium = users("STAGE_2_USERS", 50);
    let heavy = users("STAGE_3_USERS", 100);
    let minutes = |m: u64| Duration::from_secs(m * 60);

    [
        (1, light),
        (2, light),
        (1, medium),
        (3, medium),
        (1, heavy),
        (2, heavy),
        (2, light),
        (1, 0),
    ]
    .into_iter()
    .map(|(m, target)| Stage {
        duration: minutes(m),
        target,
    })
    .collect()
}

/// Length of the whole run, `None` if it does not fit in a `Duration`.
fn total_duration(stages: &[Stage]) -> Option<Duration> {
    stages
        .iter()
        .try_fold(Duration::ZERO, |total, stage| total.checked_add(stage.duration))
}

/// Desired number of users `elapsed` into the run, `None` once every stage
/// has completed.
fn target_at(stages: &[Stage], elapsed: Duration) -> Option<usize> {
    let mut from = 0usize;
    let mut offset = Duration::ZERO;
    for stage in stages {
        let end = offset + stage.duration;
        if elapsed < end {
            let progress = (elapsed - offset).as_secs_f64() / stage.duration.as_secs_f64();
            let users = from as f64 + (stage.target as f64 - from as f64) * progress;
            return Some(users.round() as usize);
        }
        from = stage.target;
        offset = end;
    }
    None
}

/// Interpolated percentile of an ascending sample.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = p / 100.0 * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        },
    }
}

/// A named check on one request: accepted statuses and a latency ceiling.
struct Check {
    name: &'static str,
    statuses: &'static [u16],
    max_ms: f64,
}

const HEALTH: Check = Check {
    name: "health",
    statuses: &[200],
    max_ms: 500.0,
};
const LIST: Check = Check {
    name: "list",
    statuses: &[200],
    max_ms: 1000.0,
};
const GET: Check = Check {
    name: "get",
    statuses: &[200, 404],
    max_ms: 500.0,
};
const CREATE: Check = Check {
    name: "create",
    statuses: &[200, 201, 400],
    max_ms: 1000.0,
};
const METRICS: Check = Check {
    name: "metrics",
    statuses: &[200, 404],
    max_ms: 200.0,
};
const DB_LIST: Check = Check {
    name: "db list",
    statuses: &[200],
    max_ms: 1500.0,
};

/// Shared collector for every virtual user.
#[derive(Default)]
struct Stats {
    durations_ms: Mutex<Vec<f64>>,
    requests: AtomicU64,
    failed: AtomicU64,
    checks_passed: AtomicU64,
    checks_failed: AtomicU64,
    iterations: AtomicU64,
}

impl Stats {
    /// Record one response. A request fails on transport error or a status
    /// outside 200-399.
    fn record(&self, check: &Check, elapsed: Duration, status: Option<u16>) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.durations_ms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ms);
        if !status.is_some_and(|s| (200..400).contains(&s)) {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let status_ok = status.is_some_and(|s| check.statuses.contains(&s));
        let latency_ok = ms < check.max_ms;
        for ok in [status_ok, latency_ok] {
            let counter = if ok {
                &self.checks_passed
            } else {
                &self.checks_failed
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
        if !status_ok {
            debug!(check = check.name, ?status, "status check failed");
        }
    }

    fn report(&self) -> LoadTestReport {
        let mut durations = self
            .durations_ms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        durations.sort_by(f64::total_cmp);
        let requests = self.requests.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        LoadTestReport {
            requests,
            failed,
            iterations: self.iterations.load(Ordering::Relaxed),
            checks_passed: self.checks_passed.load(Ordering::Relaxed),
            checks_failed: self.checks_failed.load(Ordering::Relaxed),
            p95_ms: percentile(&durations, 95.0),
            p99_ms: percentile(&durations, 99.0),
        }
    }
}

/// Outcome of a load test run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadTestReport {
    pub requests: u64,
    pub failed: u64,
    pub iterations: u64,
    pub checks_passed: u64,
    pub checks_failed: u64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LoadTestReport {
    pub fn failure_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failed as f64 / self.requests as f64
        }
    }

    /// Names of the thresholds this run violated.
    pub fn failed_thresholds(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        if self.p95_ms >= P95_THRESHOLD_MS {
            failed.push("p(95)<500ms");
        }
        if self.p99_ms >= P99_THRESHOLD_MS {
            failed.push("p(99)<1000ms");
        }
        if self.failure_rate() >= FAILURE_RATE_THRESHOLD {
            failed.push("failure rate<10%");
        }
        failed
    }
}

impl fmt::Display for LoadTestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "iterations ......: {}", self.iterations)?;
        writeln!(f, "requests ........: {}", self.requests)?;
        writeln!(
            f,
            "failed ..........: {} ({:.2}%)",
            self.failed,
            self.failure_rate() * 100.0
        )?;
        writeln!(
            f,
            "checks ..........: {} passed, {} failed",
            self.checks_passed, self.checks_failed
        )?;
        writeln!(f, "p(95) ...........: {:.2}ms", self.p95_ms)?;
        write!(f, "p(99) ...........: {:.2}ms", self.p99_ms)
    }
}

/// One virtual user's scenario, repeated until told to stop.
struct VirtualUser {
    id: usize,
    base_url: String,
    client: reqwest::Client,
    stats: Arc<Stats>,
    stop: Arc<AtomicBool>,
}

impl VirtualUser {
    async fn run(self) {
        let mut iteration = 0u64;
        while !self.stop.load(Ordering::Relaxed) {
            self.iteration(iteration).await;
            self.stats.iterations.fetch_add(1, Ordering::Relaxed);
            iteration += 1;
        }
    }

    async fn iteration(&self, iteration: u64) {
        // Health checks
        self.get("/api/health", &HEALTH).await;
        pause(1.0).await;

        // Timetable API
        self.get("/api/timetable", &LIST).await;
        pause(0.5).await;
        self.get("/api/timetable/1", &GET).await;
        pause(0.5).await;
        let payload = lesson_payload(self.id, iteration);
        let start = Instant::now();
        let status = self
            .client
            .post(format!("{}/api/timetable", self.base_url))
            .json(&payload)
            .send()
            .await
            .map(|r| r.status().as_u16());
        self.finish(&CREATE, start, status).await;
        pause(1.0).await;

        // Metrics collection
        self.get("/metrics", &METRICS).await;
        pause(2.0).await;

        // Database operations
        self.get("/api/timetable", &DB_LIST).await;
        pause(1.0).await;
    }

    async fn get(&self, path: &str, check: &Check) {
        let start = Instant::now();
        let status = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .map(|r| r.status().as_u16());
        self.finish(check, start, status).await;
    }

    async fn finish(&self, check: &Check, start: Instant, status: reqwest::Result<u16>) {
        let status = match status {
            Ok(status) => Some(status),
            Err(e) => {
                debug!(vu = self.id, check = check.name, error = %e, "request failed");
                None
            },
        };
        self.stats.record(check, start.elapsed(), status);
    }
}

async fn pause(seconds: f64) {
    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
}

fn lesson_payload(vu: usize, iteration: u64) -> serde_json::Value {
    let mut rng = rand::rng();
    let day = WEEKDAYS[rng.random_range(0..WEEKDAYS.len())];
    let hour: u32 = rng.random_range(8..16);
    json!({
        "class_name": format!("Class_{vu}_{iteration}"),
        "day": day,
        "start_time": format!("{hour:02}:00"),
        "end_time": format!("{hour:02}:45"),
        "subject": "Load test lesson",
    })
}

/// Run the ramping load test and print the summary.
///
/// # Errors
///
/// Fails if any threshold is violated, so the process exits non-zero.
pub async fn run(args: LoadTestArgs) -> anyhow::Result<()> {
    let stages = if args.stages.is_empty() {
        default_stages(|name| std::env::var(name).ok())
    } else {
        args.stages
    };
    let base_url = args.base_url.trim_end_matches('/').to_string();
    let Some(total) = total_duration(&stages) else {
        bail!("load test stages add up to more than the longest supported duration");
    };
    info!(%base_url, stages = stages.len(), duration_secs = total.as_secs(), "starting load test");
    for (i, stage) in stages.iter().enumerate() {
        info!(
            stage = i + 1,
            duration_secs = stage.duration.as_secs(),
            target = stage.target,
            "stage"
        );
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?;
    let stats = Arc::new(Stats::default());
    let mut active: Vec<(Arc<AtomicBool>, JoinHandle<()>)> = Vec::new();
    let mut retired: Vec<JoinHandle<()>> = Vec::new();
    let mut next_id = 1;

    let started = Instant::now();
    let mut ticker = tokio::time::interval(TICK);
    while let Some(target) = target_at(&stages, started.elapsed()) {
        while active.len() < target {
            let stop = Arc::new(AtomicBool::new(false));
            let user = VirtualUser {
                id: next_id,
                base_url: base_url.clone(),
                client: client.clone(),
                stats: Arc::clone(&stats),
                stop: Arc::clone(&stop),
            };
            next_id += 1;
            active.push((stop, tokio::spawn(user.run())));
        }
        while active.len() > target {
            if let Some((stop, handle)) = active.pop() {
                stop.store(true, Ordering::Relaxed);
                retired.push(handle);
            }
        }
        ticker.tick().await;
    }

    for (stop, handle) in active.drain(..) {
        stop.store(true, Ordering::Relaxed);
        retired.push(handle);
    }
    let drain = futures::future::join_all(retired.iter_mut());
    if tokio::time::timeout(GRACEFUL_STOP, drain).await.is_err() {
        warn!("virtual users did not finish in time, aborting");
        for handle in &retired {
            handle.abort();
        }
    }

    let report = stats.report();
    println!("{report}");
    let failed = report.failed_thresholds();
    if failed.is_empty() {
        info!("all thresholds passed");
        Ok(())
    } else {
        bail!("thresholds failed: {}", failed.join(", "))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn parses_stages() {
        assert_eq!("1m:10".parse::<Stage>().unwrap(), Stage {
            duration: secs(60),
            target: 10
        });
        assert_eq!("1m30s:5".parse::<Stage>().unwrap().duration, secs(90));
        assert_eq!("45:0".parse::<Stage>().unwrap().duration, secs(45));
        assert!("1m".parse::<Stage>().is_err());
        assert!("1x:3".parse::<Stage>().is_err());
        assert!("1m:many".parse::<Stage>().is_err());
        assert!("5m3:1".parse::<Stage>().is_err());
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let err = "9999999999999999h:1".parse::<Stage>().unwrap_err();
        assert!(err.contains("too long"), "{err}");
        assert!(parse_duration("18446744073709551615s1s").is_err());
        assert_eq!(
            parse_duration("18446744073709551615").unwrap(),
            secs(u64::MAX)
        );

        let huge = Stage {
            duration: secs(u64::MAX),
            target: 1,
        };
        assert_eq!(total_duration(&[huge]), Some(secs(u64::MAX)));
        assert_eq!(total_duration(&[huge, huge]), None);
    }

    #[test]
    fn default_profile_reads_env_levels() {
        let stages = default_stages(|name| (name == "STAGE_2_USERS").then(|| "20".to_string()));
        let targets: Vec<_> = stages.iter().map(|s| s.target).collect();
        assert_eq!(targets, vec![10, 10, 20, 20, 100, 100, 10, 0]);
        let total: Duration = stages.iter().map(|s| s.duration).sum();
        assert_eq!(total, secs(13 * 60));
    }

    #[test]
    fn target_ramps_linearly() {
        let stages = [
            Stage {
                duration: secs(10),
                target: 10,
            },
            Stage {
                duration: secs(10),
                target: 10,
            },
            Stage {
                duration: secs(10),
                target: 0,
            },
        ];
        assert_eq!(target_at(&stages, secs(0)), Some(0));
        assert_eq!(target_at(&stages, secs(5)), Some(5));
        assert_eq!(target_at(&stages, secs(15)), Some(10));
        assert_eq!(target_at(&stages, secs(25)), Some(5));
        assert_eq!(target_at(&stages, secs(30)), None);
    }

    #[test]
    fn percentile_interpolates() {
        let sample: Vec<f64> = (1..=100).map(f64::from).collect();
        assert!((percentile(&sample, 95.0) - 95.05).abs() < 1e-9);
        assert_eq!(percentile(&sample, 100.0), 100.0);
        assert_eq!(percentile(&[], 99.0), 0.0);
        assert_eq!(percentile(&[7.0], 99.0), 7.0);
    }

    #[test]
    fn stats_classify_failures_and_checks() {
        let stats = Stats::default();
        stats.record(&GET, Duration::from_millis(10), Some(404));
        stats.record(&LIST, Duration::from_millis(10), Some(500));
        stats.record(&HEALTH, Duration::from_millis(900), Some(200));
        stats.record(&HEALTH, Duration::from_millis(10), None);

        let report = stats.report();
        assert_eq!(report.requests, 4);
        // 404 and 500 are failed requests, as is the transport error.
        assert_eq!(report.failed, 3);
        // get: 2 pass; list: status fails; health: latency fails; error: status fails.
        assert_eq!(report.checks_passed, 5);
        assert_eq!(report.checks_failed, 3);
    }

    #[test]
    fn thresholds() {
        let passing = LoadTestReport {
            requests: 100,
            failed: 9,
            iterations: 10,
            checks_passed: 200,
            checks_failed: 0,
            p95_ms: 120.0,
            p99_ms: 480.0,
        };
        assert!(passing.failed_thresholds().is_empty());

        let failing = LoadTestReport {
            failed: 10,
            p95_ms: 500.0,
            p99_ms: 1200.0,
            ..passing
        };
        assert_eq!(failing.failed_thresholds(), vec![
            "p(95)<500ms",
            "p(99)<1000ms",
            "failure rate<10%"
        ]);
    }
}
