//! Parsers for the output of the monitor's probe commands.
//!
//! All functions are total: malformed input yields zeros or empty values
//! instead of errors.

use super::types::{DiskMount, UNKNOWN};

/// Fields extracted from `/proc/cpuinfo`.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuInfo {
    pub model: String,
    pub cores: u32,
    pub threads: u32,
    pub frequency: String,
}

/// Memory and swap figures in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total: u64,
    pub used: u64,
    pub swap_total: u64,
    pub swap_used: u64,
}

/// `used / total` as a percentage, 0 when `total` is 0.
pub fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

/// Text after the first `:` of a `key : value` line, trimmed.
fn value_after_colon(line: &str) -> &str {
    line.split_once(':').map(|(_, v)| v.trim()).unwrap_or("")
}

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').trim_matches('\'').to_string()
}

/// `(PRETTY_NAME, VERSION_ID)` from `/etc/os-release`. Missing keys are
/// empty strings.
pub fn parse_os_release(output: &str) -> (String, String) {
    let mut name = String::new();
    let mut version = String::new();
    for line in output.lines() {
        if let Some(v) = line.strip_prefix("PRETTY_NAME=") {
            name = unquote(v);
        } else if let Some(v) = line.strip_prefix("VERSION_ID=") {
            version = unquote(v);
        }
    }
    (name, version)
}

/// Summarize `/proc/cpuinfo`. Threads fall back to the number of
/// `processor` entries and cores fall back to threads.
pub fn parse_cpuinfo(output: &str) -> CpuInfo {
    let mut model = None;
    let mut cores = None;
    let mut siblings = None;
    let mut mhz = None;
    let mut processors = 0u32;

    for line in output.lines() {
        let key = line.split(':').next().unwrap_or("").trim();
        match key {
            "model name" if model.is_none() => model = Some(value_after_colon(line).to_string()),
            "cpu cores" if cores.is_none() => cores = value_after_colon(line).parse::<u32>().ok(),
            "siblings" if siblings.is_none() => {
                siblings = value_after_colon(line).parse::<u32>().ok()
            }
            "cpu MHz" if mhz.is_none() => mhz = value_after_colon(line).parse::<f64>().ok(),
            "processor" => processors += 1,
            _ => {}
        }
    }

    let threads = siblings.filter(|&n| n > 0).unwrap_or(processors);
    let cores = cores.filter(|&n| n > 0).unwrap_or(threads);
    CpuInfo {
        model: model
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| UNKNOWN.to_string()),
        cores,
        threads,
        frequency: mhz
            .map(|f| format!("{f} MHz"))
            .unwrap_or_else(|| UNKNOWN.to_string()),
    }
}

/// CPU busy percentage from `vmstat 1 2` output: 100 minus the `id`
/// column of the last sample. The column is located from the header.
pub fn parse_vmstat_cpu_usage(output: &str) -> Option<f64> {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    let header = lines
        .iter()
        .find(|l| l.split_whitespace().any(|col| col == "id"))?;
    let idle_idx = header.split_whitespace().position(|col| col == "id")?;
    let last = lines.last()?;
    let idle: f64 = last.split_whitespace().nth(idle_idx)?.parse().ok()?;
    Some((100.0 - idle).clamp(0.0, 100.0))
}

/// Extract the numeric kB value from a `/proc/meminfo` line like
/// `"MemTotal:       16384000 kB"`.
pub fn parse_meminfo_value(line: &str) -> u64 {
    line.split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Memory figures from `/proc/meminfo`. Used memory is total minus
/// `MemAvailable`, or minus `MemFree` on kernels without it.
pub fn parse_meminfo(output: &str) -> MemInfo {
    let mut total = 0;
    let mut free = 0;
    let mut available = None;
    let mut swap_total = 0;
    let mut swap_free = 0;

    for line in output.lines() {
        let kib = parse_meminfo_value(line);
        match line.split(':').next().unwrap_or("") {
            "MemTotal" => total = kib,
            "MemFree" => free = kib,
            "MemAvailable" => available = Some(kib),
            "SwapTotal" => swap_total = kib,
            "SwapFree" => swap_free = kib,
            _ => {}
        }
    }

    let available = available.unwrap_or(free);
    MemInfo {
        total: total * 1024,
        used: total.saturating_sub(available) * 1024,
        swap_total: swap_total * 1024,
        swap_used: swap_total.saturating_sub(swap_free) * 1024,
    }
}

/// Parse `df -kP` output into mount rows (sizes in bytes).
pub fn parse_df(output: &str) -> Vec<DiskMount> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 6 {
                return None;
            }
            let kib = |s: &str| s.parse::<u64>().unwrap_or(0) * 1024;
            Some(DiskMount {
                filesystem: parts[0].to_string(),
                size: kib(parts[1]),
                used: kib(parts[2]),
                available: kib(parts[3]),
                usage: parts[4].trim_end_matches('%').parse().unwrap_or(0.0),
                // Mount points may contain spaces.
                mount_point: parts[5..].join(" "),
            })
        })
        .collect()
}

/// `(interface, address)` pairs from `ip -o addr show`.
pub fn parse_ip_addr(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            // "<idx>: <name> <family> <addr>/<prefix> ..."
            if parts.len() < 4 || !parts[2].starts_with("inet") {
                return None;
            }
            let name = parts[1].split('@').next().unwrap_or(parts[1]);
            let addr = parts[3].split('/').next().unwrap_or(parts[3]);
            Some((name.to_string(), addr.to_string()))
        })
        .collect()
}

/// 1, 5 and 15 minute load averages from `/proc/loadavg`.
pub fn parse_loadavg(output: &str) -> (f64, f64, f64) {
    let mut parts = output
        .split_whitespace()
        .map(|s| s.parse::<f64>().unwrap_or(0.0));
    (
        parts.next().unwrap_or(0.0),
        parts.next().unwrap_or(0.0),
        parts.next().unwrap_or(0.0),
    )
}

/// Whole seconds of uptime from `/proc/uptime`.
pub fn parse_uptime(output: &str) -> u64 {
    output
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .map(|secs| secs as u64)
        .unwrap_or(0)
}

/// `(total, running)` from `ps -e -o stat=`: one state per line, running
/// processes start with `R`.
pub fn parse_process_states(output: &str) -> (u32, u32) {
    let states: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let running = states.iter().filter(|s| s.starts_with('R')).count();
    (states.len() as u32, running as u32)
}

/// Interface names are interpolated into shell commands; accept only
/// what the kernel allows in practice.
pub fn is_safe_interface_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 32
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}
