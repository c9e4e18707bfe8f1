use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use crate::config::AgentConfig;
use crate::runtime::{run_bounded, ComposeRuntime, ContainerRuntime};

const PREFERRED_INTERFACES: &[&str] = &["eth0", "wlan0", "en0", "wlan1", "eth1"];
const DF_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemMetrics {
    pub uptime_seconds: u64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub temperature_celsius: Option<f64>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkloadMetrics {
    pub running: u32,
    pub failed: u32,
}

#[allow(async_fn_in_trait)]
pub trait MetricsSource {
    async fn collect_system(&self) -> SystemMetrics;

    async fn collect_workload(&self) -> WorkloadMetrics;

    /// Commit currently checked out for the primary workload.
    fn commit_hash(&self) -> Option<String>;

    fn hostname(&self) -> String;
}

#[derive(Debug, Clone, Copy)]
struct CpuSample {
    idle: u64,
    total: u64,
}

/// Metrics read from procfs/sysfs on a Linux host.
pub struct HostMetrics<R = ComposeRuntime> {
    runtime: R,
    proc_root: PathBuf,
    net_root: PathBuf,
    temperature_path: PathBuf,
    repo_path: PathBuf,
    last_cpu: Cell<Option<CpuSample>>,
}

impl HostMetrics<ComposeRuntime> {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            ComposeRuntime::from_config(config),
            config.temperature_path.clone(),
            config.repo_path.clone(),
        )
    }
}

impl<R: ContainerRuntime> HostMetrics<R> {
    pub fn new(runtime: R, temperature_path: PathBuf, repo_path: PathBuf) -> Self {
        Self {
            runtime,
            proc_root: PathBuf::from("/proc"),
            net_root: PathBuf::from("/sys/class/net"),
            temperature_path,
            repo_path,
            last_cpu: Cell::new(None),
        }
    }

    #[cfg(test)]
    fn with_roots(mut self, proc_root: PathBuf, net_root: PathBuf) -> Self {
        self.proc_root = proc_root;
        self.net_root = net_root;
        self
    }

    fn uptime(&self) -> u64 {
        read_trimmed(&self.proc_root.join("uptime"))
            .and_then(|s| parse_uptime(&s))
            .unwrap_or(0)
    }

    /// Percent busy since the previous call; the first call reports 0.
    fn cpu_percent(&self) -> f64 {
        let Some(sample) = read_trimmed(&self.proc_root.join("stat")).and_then(|s| parse_cpu(&s))
        else {
            return 0.0;
        };
        let previous = self.last_cpu.replace(Some(sample));
        match previous {
            Some(prev) if sample.total > prev.total => {
                let total = (sample.total - prev.total) as f64;
                let idle = sample.idle.saturating_sub(prev.idle) as f64;
                // counters are not guaranteed monotonic (iowait in particular)
                round1(((total - idle) / total * 100.0).clamp(0.0, 100.0))
            }
            _ => 0.0,
        }
    }

    fn memory_percent(&self) -> f64 {
        read_trimmed(&self.proc_root.join("meminfo"))
            .and_then(|s| parse_meminfo(&s))
            .unwrap_or(0.0)
    }

    async fn disk_percent(&self) -> f64 {
        let mut cmd = Command::new("df");
        cmd.args(["-P", "/"]);
        match run_bounded(cmd, DF_TIMEOUT).await {
            Ok(output) if output.status.success() => {
                parse_df(&String::from_utf8_lossy(&output.stdout)).unwrap_or(0.0)
            }
            Ok(output) => {
                tracing::debug!(status = %output.status, "df exited unsuccessfully");
                0.0
            }
            Err(e) => {
                tracing::debug!(error = %e, "df unavailable");
                0.0
            }
        }
    }

    fn temperature(&self) -> Option<f64> {
        let raw = read_trimmed(&self.temperature_path)?;
        match raw.parse::<f64>() {
            Ok(millidegrees) => Some(round1(millidegrees / 1000.0)),
            Err(e) => {
                tracing::warn!(error = %e, path = %self.temperature_path.display(), "failed to parse temperature");
                None
            }
        }
    }

    fn mac_address(&self) -> Option<String> {
        let mut candidates: Vec<String> = PREFERRED_INTERFACES.iter().map(|s| s.to_string()).collect();
        if let Ok(entries) = std::fs::read_dir(&self.net_root) {
            let mut others: Vec<String> = entries
                .flatten()
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| name != "lo" && !name.starts_with("docker"))
                .filter(|name| !PREFERRED_INTERFACES.contains(&name.as_str()))
                .collect();
            others.sort();
            candidates.extend(others);
        }

        candidates.iter().find_map(|iface| {
            read_trimmed(&self.net_root.join(iface).join("address"))
                .filter(|mac| !mac.is_empty() && mac != "00:00:00:00:00:00")
        })
    }
}

impl<R: ContainerRuntime> MetricsSource for HostMetrics<R> {
    async fn collect_system(&self) -> SystemMetrics {
        SystemMetrics {
            uptime_seconds: self.uptime(),
            cpu_percent: self.cpu_percent(),
            memory_percent: self.memory_percent(),
            disk_percent: self.disk_percent().await,
            temperature_celsius: self.temperature(),
            ip_address: primary_ipv4(),
            mac_address: self.mac_address(),
        }
    }

    async fn collect_workload(&self) -> WorkloadMetrics {
        match self.runtime.container_counts().await {
            Ok(counts) => WorkloadMetrics {
                running: counts.running,
                failed: counts.not_running,
            },
            Err(e) => {
                tracing::debug!(error = %e, "container runtime unavailable, reporting empty workload metrics");
                WorkloadMetrics::default()
            }
        }
    }

    fn commit_hash(&self) -> Option<String> {
        read_git_head(&self.repo_path.join(".git"))
    }

    fn hostname(&self) -> String {
        read_trimmed(&self.proc_root.join("sys/kernel/hostname"))
            .filter(|h| !h.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .ok()
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn parse_uptime(raw: &str) -> Option<u64> {
    let secs: f64 = raw.split_whitespace().next()?.parse().ok()?;
    Some(secs as u64)
}

/// Aggregate `cpu` line of /proc/stat. Idle includes iowait.
fn parse_cpu(raw: &str) -> Option<CpuSample> {
    let line = raw.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    // guest time is already folded into user/nice
    let total = fields.iter().take(8).sum();
    Some(CpuSample { idle, total })
}

fn parse_meminfo(raw: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        raw.lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some(round1((total - available) / total * 100.0))
}

/// `df -P` output: filesystem, blocks, used, available, capacity, mount.
fn parse_df(raw: &str) -> Option<f64> {
    let line = raw.lines().nth(1)?;
    let cols: Vec<&str> = line.split_whitespace().collect();
    let used: f64 = cols.get(2)?.parse().ok()?;
    let available: f64 = cols.get(3)?.parse().ok()?;
    if used + available <= 0.0 {
        return None;
    }
    Some(round1(used / (used + available) * 100.0))
}

/// Resolve HEAD to a commit, following one symbolic ref (loose or packed).
fn read_git_head(git_dir: &Path) -> Option<String> {
    let head = read_trimmed(&git_dir.join("HEAD"))?;
    let Some(reference) = head.strip_prefix("ref: ") else {
        return Some(head).filter(|h| !h.is_empty());
    };

    if let Some(hash) = read_trimmed(&git_dir.join(reference)) {
        return Some(hash);
    }

    let packed = std::fs::read_to_string(git_dir.join("packed-refs")).ok()?;
    packed.lines().find_map(|line| {
        let (hash, name) = line.split_once(' ')?;
        (name == reference).then(|| hash.to_string())
    })
}

/// Source address the kernel would use for outbound traffic. No packet is sent.
fn primary_ipv4() -> Option<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let addr = socket.local_addr().ok()?;
    (!addr.ip().is_unspecified()).then(|| addr.ip().to_string())
}
