//! Per-thread-group CPU utilization sampling for the monitored process.
//!
//! Reads `/proc/<pid>/task/<tid>/stat` at a fixed cadence and attributes
//! consumed jiffies to logical thread roles (vCPU threads vs. the rest of
//! the monitor) by thread-name prefix. Samples taken inside the warmup
//! window are discarded so the series reflects steady-state I/O only.
//!
//! The polling loop blocks; run it on its own thread of control (see
//! [`crate::trial`]) so it is not starved while the caller blocks on the
//! remote workload command.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::BenchError;

/// Jiffies per second. USER_HZ is 100 on all supported Linux targets.
const USER_HZ: f64 = 100.0;

/// Utilization series per logical thread group, ordered by sample time.
pub type CpuSeries = BTreeMap<String, Vec<f64>>;

/// One logical thread role of the monitored process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadGroup {
    /// Role name used in emitted metrics, e.g. `vcpu`.
    pub name: String,
    /// Thread comm prefix selecting the role's threads. An empty prefix
    /// matches every thread.
    pub comm_prefix: String,
}

/// Handle to the process whose CPU time is being attributed.
#[derive(Debug, Clone)]
pub struct MonitoredProcess {
    pid: u32,
    groups: Vec<ThreadGroup>,
}

impl MonitoredProcess {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            groups: Vec::new(),
        }
    }

    /// Add a thread group keyed by comm prefix.
    #[must_use]
    pub fn with_group(mut self, name: impl Into<String>, comm_prefix: impl Into<String>) -> Self {
        self.groups.push(ThreadGroup {
            name: name.into(),
            comm_prefix: comm_prefix.into(),
        });
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn groups(&self) -> &[ThreadGroup] {
        &self.groups
    }
}

/// CPU time of one thread, parsed from its stat file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStat {
    /// Thread name (`comm`), without the surrounding parentheses.
    pub comm: String,
    /// utime + stime, in jiffies.
    pub total_ticks: u64,
}

impl TaskStat {
    /// Parse one `/proc/<pid>/task/<tid>/stat` line.
    ///
    /// `comm` is delimited by parentheses and may itself contain spaces
    /// and parentheses (`fc_vcpu 0`), so fields are located relative to
    /// the LAST closing parenthesis. utime and stime are fields 14 and 15
    /// of the full line.
    pub fn parse(line: &str) -> Result<Self, String> {
        let open = line
            .find('(')
            .ok_or_else(|| "missing '(' around comm".to_string())?;
        let close = line
            .rfind(')')
            .ok_or_else(|| "missing ')' around comm".to_string())?;
        if close < open {
            return Err("mismatched comm parentheses".to_string());
        }

        let comm = line[open + 1..close].to_string();
        let rest: Vec<&str> = line[close + 1..].split_whitespace().collect();

        // rest[0] is the state field (3rd of the full line), so utime and
        // stime land at rest[11] and rest[12].
        if rest.len() < 13 {
            return Err(format!(
                "stat line too short: {} fields after comm",
                rest.len()
            ));
        }
        let utime: u64 = rest[11]
            .parse()
            .map_err(|_| format!("invalid utime: {}", rest[11]))?;
        let stime: u64 = rest[12]
            .parse()
            .map_err(|_| format!("invalid stime: {}", rest[12]))?;

        Ok(Self {
            comm,
            total_ticks: utime + stime,
        })
    }
}

/// Read the stat of every thread of `pid`, keyed by tid.
///
/// Threads that exit between the directory listing and the stat read are
/// skipped; a vanished thread is normal, a vanished process is an error.
pub fn read_task_stats(pid: u32) -> Result<BTreeMap<u32, TaskStat>, BenchError> {
    let task_dir = format!("/proc/{pid}/task");
    let entries = std::fs::read_dir(&task_dir).map_err(|e| BenchError::Sampler {
        pid,
        reason: format!("cannot list {task_dir}: {e}"),
    })?;

    let mut stats = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| BenchError::Sampler {
            pid,
            reason: format!("cannot read {task_dir}: {e}"),
        })?;
        let Some(tid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };

        let stat_path = entry.path().join("stat");
        let line = match std::fs::read_to_string(&stat_path) {
            Ok(line) => line,
            Err(_) => {
                debug!(pid, tid, "thread exited during sampling, skipped");
                continue;
            }
        };
        let stat = TaskStat::parse(&line).map_err(|reason| BenchError::Sampler {
            pid,
            reason: format!("tid {tid}: {reason}"),
        })?;
        stats.insert(tid, stat);
    }
    Ok(stats)
}

/// Attribute the tick delta between two snapshots to thread groups and
/// convert it to a utilization percentage over `interval`.
pub fn group_utilization(
    prev: &BTreeMap<u32, TaskStat>,
    curr: &BTreeMap<u32, TaskStat>,
    groups: &[ThreadGroup],
    interval: Duration,
) -> BTreeMap<String, f64> {
    let interval_ticks = USER_HZ * interval.as_secs_f64();

    let mut result = BTreeMap::new();
    for group in groups {
        let mut delta = 0u64;
        for (tid, stat) in curr {
            if !stat.comm.starts_with(&group.comm_prefix) {
                continue;
            }
            let prev_ticks = prev.get(tid).map_or(0, |p| p.total_ticks);
            delta += stat.total_ticks.saturating_sub(prev_ticks);
        }
        let percent = if interval_ticks > 0.0 {
            delta as f64 / interval_ticks * 100.0
        } else {
            0.0
        };
        result.insert(group.name.clone(), percent);
    }
    result
}

/// Sample the process at `cadence` for `runtime`, discarding the first
/// `warmup` worth of samples.
///
/// Blocking; the resulting series covers approximately
/// `runtime - warmup` per group.
pub fn sample_process(
    process: &MonitoredProcess,
    runtime: Duration,
    warmup: Duration,
    cadence: Duration,
) -> Result<CpuSeries, BenchError> {
    let total = (runtime.as_secs_f64() / cadence.as_secs_f64()).round() as usize;
    let skip = (warmup.as_secs_f64() / cadence.as_secs_f64()).round() as usize;

    debug!(
        pid = process.pid(),
        total_samples = total,
        warmup_samples = skip,
        "cpu sampler started"
    );

    let mut series: CpuSeries = process
        .groups()
        .iter()
        .map(|g| (g.name.clone(), Vec::new()))
        .collect();

    let mut prev = read_task_stats(process.pid())?;
    let mut prev_at = Instant::now();

    for i in 0..total {
        std::thread::sleep(cadence);
        let curr = read_task_stats(process.pid())?;
        let now = Instant::now();

        let sample = group_utilization(&prev, &curr, process.groups(), now - prev_at);
        if i >= skip {
            for (name, percent) in sample {
                match series.get_mut(&name) {
                    Some(values) => values.push(percent),
                    None => warn!(group = %name, "unknown thread group"),
                }
            }
        }

        prev = curr;
        prev_at = now;
    }

    debug!(pid = process.pid(), "cpu sampler finished");
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat_line(comm: &str, utime: u64, stime: u64) -> String {
        format!(
            "1234 ({comm}) S 1 1234 1234 0 -1 4194304 500 0 0 0 {utime} {stime} 0 0 20 0 2 0 \
             12345 100000000 300 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0"
        )
    }

    #[test]
    fn parses_stat_line_with_spaces_in_comm() {
        let stat = TaskStat::parse(&stat_line("fc_vcpu 0", 120, 30)).expect("parse");
        assert_eq!(stat.comm, "fc_vcpu 0");
        assert_eq!(stat.total_ticks, 150);
    }

    #[test]
    fn parses_stat_line_with_parens_in_comm() {
        let stat = TaskStat::parse(&stat_line("weird (name)", 5, 5)).expect("parse");
        assert_eq!(stat.comm, "weird (name)");
        assert_eq!(stat.total_ticks, 10);
    }

    #[test]
    fn rejects_truncated_stat_line() {
        let err = TaskStat::parse("99 (short) S 1 2").expect_err("must fail");
        assert!(err.contains("too short"));
    }

    #[test]
    fn rejects_missing_comm_parens() {
        assert!(TaskStat::parse("99 noparens S 1 2").is_err());
    }

    fn snapshot(entries: &[(u32, &str, u64)]) -> BTreeMap<u32, TaskStat> {
        entries
            .iter()
            .map(|(tid, comm, ticks)| {
                (
                    *tid,
                    TaskStat {
                        comm: comm.to_string(),
                        total_ticks: *ticks,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn attributes_ticks_by_comm_prefix() {
        let groups = vec![
            ThreadGroup {
                name: "vcpu".to_string(),
                comm_prefix: "fc_vcpu".to_string(),
            },
            ThreadGroup {
                name: "vmm".to_string(),
                comm_prefix: "firecracker".to_string(),
            },
        ];
        let prev = snapshot(&[
            (10, "firecracker", 100),
            (11, "fc_vcpu 0", 200),
            (12, "fc_vcpu 1", 200),
        ]);
        // Over 1s at USER_HZ=100: vcpu threads burn 50+25 ticks = 75%,
        // the main thread burns 10 ticks = 10%.
        let curr = snapshot(&[
            (10, "firecracker", 110),
            (11, "fc_vcpu 0", 250),
            (12, "fc_vcpu 1", 225),
        ]);

        let result = group_utilization(&prev, &curr, &groups, Duration::from_secs(1));
        assert!((result["vcpu"] - 75.0).abs() < 0.01);
        assert!((result["vmm"] - 10.0).abs() < 0.01);
    }

    #[test]
    fn new_thread_counts_from_zero() {
        let groups = vec![ThreadGroup {
            name: "all".to_string(),
            comm_prefix: String::new(),
        }];
        let prev = snapshot(&[(10, "main", 100)]);
        let curr = snapshot(&[(10, "main", 100), (11, "spawned", 20)]);

        let result = group_utilization(&prev, &curr, &groups, Duration::from_secs(1));
        assert!((result["all"] - 20.0).abs() < 0.01);
    }

    #[test]
    fn counter_wrap_does_not_panic() {
        let groups = vec![ThreadGroup {
            name: "all".to_string(),
            comm_prefix: String::new(),
        }];
        let prev = snapshot(&[(10, "main", 500)]);
        let curr = snapshot(&[(10, "main", 100)]);

        let result = group_utilization(&prev, &curr, &groups, Duration::from_secs(1));
        assert_eq!(result["all"], 0.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn samples_own_process_and_skips_warmup() {
        let process = MonitoredProcess::new(std::process::id()).with_group("all", "");

        let series = sample_process(
            &process,
            Duration::from_millis(500),
            Duration::from_millis(200),
            Duration::from_millis(100),
        )
        .expect("sampling own pid");

        // 5 samples total, first 2 inside the warmup window.
        assert_eq!(series["all"].len(), 3);
        for value in &series["all"] {
            assert!(*value >= 0.0);
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn read_task_stats_sees_own_threads() {
        let stats = read_task_stats(std::process::id()).expect("read own /proc");
        assert!(!stats.is_empty());
    }

    #[test]
    fn dead_pid_is_a_sampler_error() {
        // PID 0 has no /proc entry from userspace.
        let err = read_task_stats(0).expect_err("must fail");
        assert!(matches!(err, BenchError::Sampler { pid: 0, .. }));
    }
}
