//! In-process transport that fabricates `/proc/stat` and `/proc/meminfo`.
//!
//! Used by demo mode and tests. Counters live per host name, so they keep
//! growing across reconnects just like a real kernel's would.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{CommandError, ConnectionError, SessionError};
use crate::target::TargetConfig;
use crate::transport::{Session, Transport};

/// Per-host knobs.
#[derive(Debug, Clone)]
pub struct SimulatedHost {
    pub cores: usize,
    pub mem_total_kb: u64,
    /// Refuse every connection attempt.
    pub unreachable: bool,
    /// Drop the session after this many commands (0 = never).
    pub drop_every: u64,
    pub seed: u64,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self {
            cores: 4,
            mem_total_kb: 16 * 1024 * 1024,
            unreachable: false,
            drop_every: 0,
            seed: 0x9e37_79b9_7f4a_7c15,
        }
    }
}

#[derive(Debug)]
struct HostState {
    params: SimulatedHost,
    rng: u64,
    // user system idle iowait per core
    counters: Vec<[u64; 4]>,
    mem_used_kb: u64,
    commands: u64,
}

impl HostState {
    fn new(params: SimulatedHost) -> Self {
        let mem_used_kb = params.mem_total_kb / 3;
        Self {
            rng: params.seed | 1,
            counters: vec![[0; 4]; params.cores.max(1)],
            mem_used_kb,
            commands: 0,
            params,
        }
    }

    // xorshift64*
    fn next(&mut self) -> u64 {
        let mut x = self.rng;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    fn stat(&mut self) -> String {
        let mut out = String::new();
        let mut sum = [0u64; 4];
        for i in 0..self.counters.len() {
            let busy = self.next() % 101;
            let wait = self.next() % 3;
            let c = &mut self.counters[i];
            c[0] += busy * 7 / 10;
            c[1] += busy - busy * 7 / 10;
            c[2] += (100 - busy).saturating_sub(wait);
            c[3] += wait.min(100 - busy);
            for (s, v) in sum.iter_mut().zip(c.iter()) {
                *s += v;
            }
        }
        let _ = writeln!(out, "cpu  {} 0 {} {} {} 0 0 0 0 0", sum[0], sum[1], sum[2], sum[3]);
        for (i, c) in self.counters.iter().enumerate() {
            let _ = writeln!(out, "cpu{i} {} 0 {} {} {} 0 0 0 0 0", c[0], c[1], c[2], c[3]);
        }
        out.push_str("intr 0\nctxt 0\n");
        out
    }

    fn meminfo(&mut self) -> String {
        let total = self.params.mem_total_kb;
        let swing = total / 50;
        let delta = self.next() % (swing * 2 + 1);
        self.mem_used_kb = (self.mem_used_kb + delta)
            .saturating_sub(swing)
            .clamp(total / 10, total * 9 / 10);
        let available = total - self.mem_used_kb;
        format!(
            "MemTotal:       {total} kB\nMemFree:        {} kB\nMemAvailable:   {available} kB\n",
            available / 2
        )
    }
}

/// Transport whose "hosts" are keyed by [`TargetConfig::host`].
#[derive(Default, Clone)]
pub struct SimulatedTransport {
    hosts: Arc<Mutex<HashMap<String, Arc<Mutex<HostState>>>>>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a host. Unknown hosts get [`SimulatedHost::default`].
    pub fn with_host(self, host: impl Into<String>, params: SimulatedHost) -> Self {
        if let Ok(mut hosts) = self.hosts.lock() {
            hosts.insert(host.into(), Arc::new(Mutex::new(HostState::new(params))));
        }
        self
    }

    fn host(&self, name: &str) -> Arc<Mutex<HostState>> {
        let mut hosts = match self.hosts.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        hosts
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(HostState::new(SimulatedHost::default()))))
            .clone()
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn connect(&self, target: &TargetConfig) -> Result<Box<dyn Session>, ConnectionError> {
        let host = self.host(&target.host);
        let unreachable = host.lock().map(|h| h.params.unreachable).unwrap_or(true);
        if unreachable {
            return Err(ConnectionError::Unreachable(format!(
                "{}: no route to host",
                target.host
            )));
        }
        Ok(Box::new(SimulatedSession { host, alive: true }))
    }
}

struct SimulatedSession {
    host: Arc<Mutex<HostState>>,
    alive: bool,
}

#[async_trait]
impl Session for SimulatedSession {
    async fn run(&mut self, command: &str) -> Result<String, SessionError> {
        if !self.alive {
            return Err(SessionError::ConnectionLost("session closed".into()));
        }
        let mut h = self
            .host
            .lock()
            .map_err(|_| SessionError::ConnectionLost("simulated host poisoned".into()))?;
        h.commands += 1;
        if h.params.drop_every > 0 && h.commands % h.params.drop_every == 0 {
            self.alive = false;
            return Err(SessionError::ConnectionLost("connection reset by peer".into()));
        }
        match command {
            "cat /proc/stat" => Ok(h.stat()),
            "cat /proc/meminfo" => Ok(h.meminfo()),
            other => Err(CommandError {
                command: other.to_string(),
                status: Some(127),
                stderr: "command not found".into(),
            }
            .into()),
        }
    }

    async fn close(&mut self) {
        self.alive = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{parse_meminfo, parse_proc_stat};
    use crate::target::{Auth, MonitorSettings};

    fn target(host: &str) -> TargetConfig {
        TargetConfig::new(
            host,
            host,
            "demo",
            Auth::Key { path: "/dev/null".into() },
            &MonitorSettings::default(),
        )
    }

    #[tokio::test]
    async fn output_parses_and_counters_grow() {
        let t = SimulatedTransport::new().with_host(
            "box",
            SimulatedHost {
                cores: 8,
                ..Default::default()
            },
        );
        let mut s = t.connect(&target("box")).await.unwrap();
        let first = parse_proc_stat(&s.run("cat /proc/stat").await.unwrap()).unwrap();
        let second = parse_proc_stat(&s.run("cat /proc/stat").await.unwrap()).unwrap();
        assert_eq!(first.len(), 8);
        assert!(second.iter().zip(&first).all(|(b, a)| b.dominates(a)));
        assert!(second[0].total() > first[0].total());
        let mem = parse_meminfo(&s.run("cat /proc/meminfo").await.unwrap()).unwrap();
        assert!(mem.used < mem.total);
    }

    #[tokio::test]
    async fn unreachable_and_dropping_hosts() {
        let t = SimulatedTransport::new()
            .with_host(
                "down",
                SimulatedHost {
                    unreachable: true,
                    ..Default::default()
                },
            )
            .with_host(
                "flaky",
                SimulatedHost {
                    drop_every: 2,
                    ..Default::default()
                },
            );
        assert!(matches!(
            t.connect(&target("down")).await,
            Err(ConnectionError::Unreachable(_))
        ));
        let mut s = t.connect(&target("flaky")).await.unwrap();
        assert!(s.run("cat /proc/stat").await.is_ok());
        assert!(matches!(
            s.run("cat /proc/stat").await,
            Err(SessionError::ConnectionLost(_))
        ));
        assert!(matches!(
            s.run("uptime").await,
            Err(SessionError::ConnectionLost(_))
        ));
    }
}
