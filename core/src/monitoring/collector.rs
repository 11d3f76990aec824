//! The probe battery that builds one [`ResourceSnapshot`].
//!
//! Each probe runs one remote command and parses it. A failing probe only
//! costs its own fields, which keep their defaults. Cancellation is checked
//! between probes so an unsubscribed tick stops after the command in
//! flight.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::parser::{
    is_safe_interface_name, parse_cpuinfo, parse_df, parse_ip_addr, parse_loadavg,
    parse_meminfo, parse_os_release, parse_process_states, parse_uptime, parse_vmstat_cpu_usage,
    percent,
};
use super::types::{NetworkInterface, ResourceSnapshot, UNKNOWN};
use crate::errors::SshError;
use crate::transport::Transport;

/// Run `command` and return its trimmed stdout, failing on empty output.
fn probe(transport: &dyn Transport, command: &str) -> Result<String, SshError> {
    let output = transport.exec(command)?;
    let stdout = output.stdout.trim();
    if stdout.is_empty() {
        return Err(SshError::Transport(format!(
            "`{command}` produced no output (exit {})",
            output.exit_status
        )));
    }
    Ok(stdout.to_string())
}

/// Like [`probe`], but logs the failure and yields `None`.
fn try_probe(transport: &dyn Transport, command: &str) -> Option<String> {
    match probe(transport, command) {
        Ok(out) => Some(out),
        Err(e) => {
            debug!("Probe `{command}` failed: {e}");
            None
        }
    }
}

/// Collect a snapshot, stopping early once `cancel` fires.
pub fn collect_snapshot(transport: &dyn Transport, cancel: &CancellationToken) -> ResourceSnapshot {
    let mut snap = ResourceSnapshot {
        timestamp: chrono::Utc::now().to_rfc3339(),
        ..Default::default()
    };

    let steps: [fn(&dyn Transport, &mut ResourceSnapshot); 11] = [
        identity_probe,
        os_probe,
        cpu_info_probe,
        cpu_usage_probe,
        memory_probe,
        disk_probe,
        network_probe,
        load_probe,
        process_probe,
        uptime_probe,
        clock_probe,
    ];
    for step in steps {
        if cancel.is_cancelled() {
            debug!("Snapshot collection cancelled");
            break;
        }
        step(transport, &mut snap);
    }
    snap
}

fn identity_probe(t: &dyn Transport, snap: &mut ResourceSnapshot) {
    if let Some(hostname) = try_probe(t, "hostname") {
        snap.hostname = hostname;
    }
    if let Some(ip) = try_probe(t, "hostname -I | awk '{print $1}'") {
        snap.ip_address = ip;
    }
}

fn os_probe(t: &dyn Transport, snap: &mut ResourceSnapshot) {
    let (name, version) = try_probe(t, "cat /etc/os-release")
        .map(|out| parse_os_release(&out))
        .unwrap_or_default();
    snap.os_name = if name.is_empty() {
        try_probe(t, "uname -s").unwrap_or_else(|| UNKNOWN.to_string())
    } else {
        name
    };
    snap.os_version = version;

    if let Some(kernel) = try_probe(t, "uname -r") {
        snap.kernel_version = kernel;
    }
    if let Some(arch) = try_probe(t, "uname -m") {
        snap.architecture = arch;
    }
}

fn cpu_info_probe(t: &dyn Transport, snap: &mut ResourceSnapshot) {
    if let Some(out) = try_probe(t, "cat /proc/cpuinfo") {
        let info = parse_cpuinfo(&out);
        snap.cpu_model = info.model;
        snap.cpu_cores = info.cores;
        snap.cpu_threads = info.threads;
        snap.cpu_frequency = info.frequency;
    }
}

fn cpu_usage_probe(t: &dyn Transport, snap: &mut ResourceSnapshot) {
    if let Some(usage) = try_probe(t, "vmstat 1 2").and_then(|out| parse_vmstat_cpu_usage(&out)) {
        snap.cpu_usage = usage;
    }
}

fn memory_probe(t: &dyn Transport, snap: &mut ResourceSnapshot) {
    if let Some(out) = try_probe(t, "cat /proc/meminfo") {
        let mem = parse_meminfo(&out);
        snap.memory_total = mem.total;
        snap.memory_used = mem.used;
        snap.memory_usage = percent(mem.used, mem.total);
        snap.swap_total = mem.swap_total;
        snap.swap_used = mem.swap_used;
        snap.swap_usage = percent(mem.swap_used, mem.swap_total);
    }
}

fn disk_probe(t: &dyn Transport, snap: &mut ResourceSnapshot) {
    let Some(out) = try_probe(t, "df -kP") else {
        return;
    };
    snap.disk_mounts = parse_df(&out);
    if let Some(root) = snap.disk_mounts.iter().find(|m| m.mount_point == "/") {
        snap.disk_total = root.size;
        snap.disk_used = root.used;
        snap.disk_usage = percent(root.used, root.size);
    }
}

/// Per-interface details read from sysfs in one round trip. Missing files
/// print an empty line so positions stay aligned.
struct InterfaceDetails {
    mac_address: String,
    status: String,
    rx_bytes: u64,
    tx_bytes: u64,
}

fn interface_details(t: &dyn Transport, name: &str) -> InterfaceDetails {
    let unknown = InterfaceDetails {
        mac_address: UNKNOWN.to_string(),
        status: UNKNOWN.to_string(),
        rx_bytes: 0,
        tx_bytes: 0,
    };
    if !is_safe_interface_name(name) {
        return unknown;
    }
    let command = format!(
        "for f in address operstate statistics/rx_bytes statistics/tx_bytes; \
         do cat /sys/class/net/{name}/$f 2>/dev/null || echo; done"
    );
    // Not trimmed as a whole: a blank first line is a missing address.
    let out = match t.exec(&command) {
        Ok(output) => output.stdout,
        Err(e) => {
            debug!("Reading sysfs for {name} failed: {e}");
            return unknown;
        }
    };
    let mut lines = out.lines().map(str::trim);
    let mut text = || {
        lines
            .next()
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN.to_string())
    };
    let mac_address = text();
    let status = text();
    let rx_bytes = text().parse().unwrap_or(0);
    let tx_bytes = text().parse().unwrap_or(0);
    InterfaceDetails {
        mac_address,
        status,
        rx_bytes,
        tx_bytes,
    }
}

fn network_probe(t: &dyn Transport, snap: &mut ResourceSnapshot) {
    let Some(out) = try_probe(t, "ip -o addr show") else {
        return;
    };
    let mut details: HashMap<String, InterfaceDetails> = HashMap::new();
    for (name, ip_address) in parse_ip_addr(&out) {
        let info = details
            .entry(name.clone())
            .or_insert_with(|| interface_details(t, &name));
        snap.network_interfaces.push(NetworkInterface {
            ip_address,
            mac_address: info.mac_address.clone(),
            status: info.status.clone(),
            rx_bytes: info.rx_bytes,
            tx_bytes: info.tx_bytes,
            name,
        });
    }
}

fn load_probe(t: &dyn Transport, snap: &mut ResourceSnapshot) {
    if let Some(out) = try_probe(t, "cat /proc/loadavg") {
        (snap.load_avg_1m, snap.load_avg_5m, snap.load_avg_15m) = parse_loadavg(&out);
    }
}

fn process_probe(t: &dyn Transport, snap: &mut ResourceSnapshot) {
    if let Some(out) = try_probe(t, "ps -e -o stat=") {
        (snap.total_processes, snap.running_processes) = parse_process_states(&out);
    }
}

fn uptime_probe(t: &dyn Transport, snap: &mut ResourceSnapshot) {
    if let Some(out) = try_probe(t, "cat /proc/uptime") {
        snap.uptime = parse_uptime(&out);
    }
}

fn clock_probe(t: &dyn Transport, snap: &mut ResourceSnapshot) {
    if let Some(out) = try_probe(t, "date '+%Y-%m-%d %H:%M:%S'") {
        snap.system_time = out;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::config::PtySize;
    use crate::transport::{CommandOutput, ShellChannel, SftpChannel};

    /// Answers commands from a fixed table and records what was asked.
    struct Scripted {
        answers: HashMap<&'static str, &'static str>,
        seen: Mutex<Vec<String>>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl Scripted {
        fn new(answers: &[(&'static str, &'static str)]) -> Self {
            Self {
                answers: answers.iter().copied().collect(),
                seen: Mutex::new(Vec::new()),
                cancel_after: None,
            }
        }
    }

    impl Transport for Scripted {
        fn is_connected(&self) -> bool {
            true
        }

        fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(command.to_string());
            if let Some((n, token)) = &self.cancel_after {
                if seen.len() >= *n {
                    token.cancel();
                }
            }
            let key = if command.starts_with("for f in") {
                "sysfs"
            } else {
                command
            };
            match self.answers.get(key) {
                Some(out) => Ok(CommandOutput {
                    stdout: out.to_string(),
                    ..Default::default()
                }),
                None => Err(SshError::Transport(format!("no script for {command}"))),
            }
        }

        fn sftp(&self) -> Result<Box<dyn SftpChannel>, SshError> {
            Err(SshError::Transport("unsupported".into()))
        }

        fn open_shell(&self, _: &str, _: PtySize) -> Result<Box<dyn ShellChannel>, SshError> {
            Err(SshError::Transport("unsupported".into()))
        }

        fn disconnect(&self) {}
    }

    #[test]
    fn full_snapshot_from_probes() {
        let t = Scripted::new(&[
            ("hostname", "web-01\n"),
            ("hostname -I | awk '{print $1}'", "10.0.0.5\n"),
            ("cat /etc/os-release", "PRETTY_NAME=\"Debian GNU/Linux 12\"\nVERSION_ID=\"12\"\n"),
            ("uname -r", "6.1.0-18-amd64\n"),
            ("uname -m", "x86_64\n"),
            ("cat /proc/cpuinfo", "processor\t: 0\nmodel name\t: Test CPU\ncpu cores\t: 1\nsiblings\t: 2\n"),
            ("vmstat 1 2", " us sy id wa st\n 1 1 98 0 0\n 3 2 75 0 0\n"),
            ("cat /proc/meminfo", "MemTotal: 1000 kB\nMemAvailable: 250 kB\n"),
            ("df -kP", "Filesystem 1024-blocks Used Available Capacity Mounted on\n/dev/vda1 100 40 60 40% /\n"),
            ("ip -o addr show", "2: eth0    inet 10.0.0.5/24 brd 10.0.0.255 scope global eth0\n"),
            ("sysfs", "52:54:00:12:34:56\nup\n1000\n2000\n"),
            ("cat /proc/loadavg", "0.50 0.25 0.10 1/100 4242\n"),
            ("ps -e -o stat=", "Ss\nR\nS\n"),
            ("cat /proc/uptime", "3600.5 7000.1\n"),
            ("date '+%Y-%m-%d %H:%M:%S'", "2024-05-01 12:00:00\n"),
        ]);
        let snap = collect_snapshot(&t, &CancellationToken::new());

        assert_eq!(snap.hostname, "web-01");
        assert_eq!(snap.ip_address, "10.0.0.5");
        assert_eq!(snap.os_name, "Debian GNU/Linux 12");
        assert_eq!(snap.os_version, "12");
        assert_eq!(snap.kernel_version, "6.1.0-18-amd64");
        assert_eq!(snap.cpu_model, "Test CPU");
        assert_eq!((snap.cpu_cores, snap.cpu_threads), (1, 2));
        assert!((snap.cpu_usage - 25.0).abs() < 1e-9);
        assert_eq!(snap.memory_total, 1000 * 1024);
        assert!((snap.memory_usage - 75.0).abs() < 1e-9);
        assert_eq!(snap.disk_total, 100 * 1024);
        assert!((snap.disk_usage - 40.0).abs() < 1e-9);
        assert_eq!(snap.network_interfaces.len(), 1);
        let eth0 = &snap.network_interfaces[0];
        assert_eq!(eth0.mac_address, "52:54:00:12:34:56");
        assert_eq!(eth0.status, "up");
        assert_eq!((eth0.rx_bytes, eth0.tx_bytes), (1000, 2000));
        assert_eq!((snap.total_processes, snap.running_processes), (3, 1));
        assert_eq!(snap.uptime, 3600);
        assert_eq!(snap.system_time, "2024-05-01 12:00:00");
        assert!(!snap.timestamp.is_empty());
    }

    #[test]
    fn failed_probes_keep_defaults() {
        let t = Scripted::new(&[("hostname", "box\n"), ("uname -s", "Linux\n")]);
        let snap = collect_snapshot(&t, &CancellationToken::new());
        assert_eq!(snap.hostname, "box");
        assert_eq!(snap.os_name, "Linux");
        assert_eq!(snap.kernel_version, UNKNOWN);
        assert_eq!(snap.cpu_cores, 0);
        assert!(snap.disk_mounts.is_empty());
        assert!(snap.network_interfaces.is_empty());
    }

    #[test]
    fn missing_mac_keeps_positions() {
        let t = Scripted::new(&[
            ("ip -o addr show", "3: wg0    inet 10.8.0.1/24 scope global wg0\n"),
            ("sysfs", "\nunknown\n5\n6\n"),
        ]);
        let snap = collect_snapshot(&t, &CancellationToken::new());
        let wg0 = &snap.network_interfaces[0];
        assert_eq!(wg0.mac_address, UNKNOWN);
        assert_eq!(wg0.status, "unknown");
        assert_eq!((wg0.rx_bytes, wg0.tx_bytes), (5, 6));
    }

    #[test]
    fn cancellation_stops_between_probes() {
        let token = CancellationToken::new();
        let mut t = Scripted::new(&[("hostname", "box\n")]);
        t.cancel_after = Some((2, token.clone()));
        let snap = collect_snapshot(&t, &token);
        assert_eq!(snap.hostname, "box");
        // The identity probe finishes its two commands, nothing runs after.
        assert_eq!(t.seen.lock().unwrap().len(), 2);
        assert_eq!(snap.os_name, UNKNOWN);
    }

    #[test]
    fn already_cancelled_runs_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let t = Scripted::new(&[]);
        let snap = collect_snapshot(&t, &token);
        assert!(t.seen.lock().unwrap().is_empty());
        assert_eq!(snap.hostname, UNKNOWN);
    }
}
