//! Counter parsing and delta computation over remote `/proc/stat` and `/proc/meminfo`.
//!
//! CPU utilization is derived from two consecutive cumulative readings:
//! `1 - Δidle/Δtotal` per core, and the same over the summed counters for the
//! aggregate. A reading is only diffed against a baseline with the same core
//! set and no decreasing counter; anything else resets the baseline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::ParseError;
use crate::types::{CoreUsage, CpuUsage, MemoryUsage};

/// Cumulative time counters of one core (kernel clock ticks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuCounters {
    pub core: u32,
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuCounters {
    fn fields(&self) -> [u64; 8] {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
        ]
    }

    pub fn total(&self) -> u64 {
        self.fields().iter().fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    /// Idle time as seen by utilization: waiting on I/O counts as idle.
    pub fn idle_time(&self) -> u64 {
        self.idle.saturating_add(self.iowait)
    }

    /// True when no counter went backwards since `prev`.
    pub fn dominates(&self, prev: &CpuCounters) -> bool {
        self.fields()
            .iter()
            .zip(prev.fields().iter())
            .all(|(now, before)| now >= before)
    }

    fn accumulate(&mut self, other: &CpuCounters) {
        self.user = self.user.saturating_add(other.user);
        self.nice = self.nice.saturating_add(other.nice);
        self.system = self.system.saturating_add(other.system);
        self.idle = self.idle.saturating_add(other.idle);
        self.iowait = self.iowait.saturating_add(other.iowait);
        self.irq = self.irq.saturating_add(other.irq);
        self.softirq = self.softirq.saturating_add(other.softirq);
        self.steal = self.steal.saturating_add(other.steal);
    }
}

/// One remote read of all counters.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCounterSample {
    pub captured_at: DateTime<Utc>,
    /// Sorted by core id.
    pub cores: Vec<CpuCounters>,
    pub memory: MemoryUsage,
}

impl RawCounterSample {
    pub fn parse(stat: &str, meminfo: &str, captured_at: DateTime<Utc>) -> Result<Self, ParseError> {
        Ok(Self {
            captured_at,
            cores: parse_proc_stat(stat)?,
            memory: parse_meminfo(meminfo)?,
        })
    }

    fn same_core_set(&self, other: &RawCounterSample) -> bool {
        self.cores.len() == other.cores.len()
            && self
                .cores
                .iter()
                .zip(other.cores.iter())
                .all(|(a, b)| a.core == b.core)
    }

    fn summed(&self) -> CpuCounters {
        let mut sum = CpuCounters::default();
        for c in &self.cores {
            sum.accumulate(c);
        }
        sum
    }
}

/// Parse the per-core `cpuN` lines of `/proc/stat`; the aggregate `cpu` line is ignored.
pub fn parse_proc_stat(text: &str) -> Result<Vec<CpuCounters>, ParseError> {
    let mut cores: BTreeMap<u32, CpuCounters> = BTreeMap::new();
    for line in text.lines() {
        let mut it = line.split_whitespace();
        let Some(label) = it.next() else { continue };
        let Some(suffix) = label.strip_prefix("cpu") else {
            continue;
        };
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let core: u32 = suffix.parse().map_err(|_| ParseError::StatLine {
            line: line.to_string(),
            reason: "core id out of range",
        })?;

        // user nice system idle [iowait irq softirq steal [guest guest_nice]]
        let mut fields = [0u64; 8];
        let mut seen = 0;
        for (slot, tok) in fields.iter_mut().zip(it) {
            *slot = tok.parse().map_err(|_| ParseError::StatLine {
                line: line.to_string(),
                reason: "non-numeric counter",
            })?;
            seen += 1;
        }
        if seen < 4 {
            return Err(ParseError::StatLine {
                line: line.to_string(),
                reason: "fewer than 4 counters",
            });
        }
        let [user, nice, system, idle, iowait, irq, softirq, steal] = fields;
        let counters = CpuCounters {
            core,
            user,
            nice,
            system,
            idle,
            iowait,
            irq,
            softirq,
            steal,
        };
        if cores.insert(core, counters).is_some() {
            return Err(ParseError::DuplicateCore(core));
        }
    }
    if cores.is_empty() {
        return Err(ParseError::NoCores);
    }
    Ok(cores.into_values().collect())
}

/// Parse `/proc/meminfo`; used = MemTotal - MemAvailable (MemFree on old kernels).
pub fn parse_meminfo(text: &str) -> Result<MemoryUsage, ParseError> {
    let mut total: Option<u64> = None;
    let mut available: Option<u64> = None;
    let mut free: Option<u64> = None;

    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let slot = match key {
            "MemTotal" => &mut total,
            "MemAvailable" => &mut available,
            "MemFree" => &mut free,
            _ => continue,
        };
        let raw = rest.split_whitespace().next().unwrap_or_default();
        let kb: u64 = raw.parse().map_err(|_| ParseError::MemValue {
            key: key.to_string(),
            value: rest.trim().to_string(),
        })?;
        *slot = Some(kb);
    }

    let total_kb = total.ok_or(ParseError::MissingMemField("MemTotal"))?;
    if total_kb == 0 {
        return Err(ParseError::MemValue {
            key: "MemTotal".into(),
            value: "0".into(),
        });
    }
    let avail_kb = available
        .or(free)
        .ok_or(ParseError::MissingMemField("MemAvailable"))?;

    Ok(MemoryUsage {
        used: total_kb.saturating_sub(avail_kb).saturating_mul(1024),
        total: total_kb.saturating_mul(1024),
    })
}

/// Why a reading could not be diffed against the baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetReason {
    CoreSetChanged { before: usize, after: usize },
    CounterDecreased { core: u32 },
}

fn utilization(prev: &CpuCounters, curr: &CpuCounters) -> f32 {
    let d_total = curr.total().saturating_sub(prev.total());
    if d_total == 0 {
        return 0.0;
    }
    let d_idle = curr.idle_time().saturating_sub(prev.idle_time());
    let pct = (1.0 - d_idle as f64 / d_total as f64) * 100.0;
    pct.clamp(0.0, 100.0) as f32
}

/// Utilization between two readings, or the reason the pair is unusable.
pub fn cpu_usage(prev: &RawCounterSample, curr: &RawCounterSample) -> Result<CpuUsage, ResetReason> {
    if !prev.same_core_set(curr) {
        return Err(ResetReason::CoreSetChanged {
            before: prev.cores.len(),
            after: curr.cores.len(),
        });
    }
    if let Some(c) = curr
        .cores
        .iter()
        .zip(prev.cores.iter())
        .find(|(c, p)| !c.dominates(p))
        .map(|(c, _)| c)
    {
        return Err(ResetReason::CounterDecreased { core: c.core });
    }

    let per_core = curr
        .cores
        .iter()
        .zip(prev.cores.iter())
        .map(|(c, p)| CoreUsage {
            core: c.core,
            percent: utilization(p, c),
        })
        .collect();
    Ok(CpuUsage {
        aggregate: utilization(&prev.summed(), &curr.summed()),
        per_core,
    })
}

/// Result of feeding one reading into a [`CounterTracker`].
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// First reading since start or reset; stored, nothing to report.
    Baseline,
    Usage(CpuUsage),
    /// Delta discarded; the reading became the new baseline.
    Reset(ResetReason),
}

/// Holds the previous reading of one target.
#[derive(Debug, Default)]
pub struct CounterTracker {
    baseline: Option<RawCounterSample>,
}

impl CounterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, sample: RawCounterSample) -> Observation {
        let outcome = match self.baseline.as_ref() {
            None => Observation::Baseline,
            Some(prev) => match cpu_usage(prev, &sample) {
                Ok(usage) => Observation::Usage(usage),
                Err(reason) => Observation::Reset(reason),
            },
        };
        self.baseline = Some(sample);
        outcome
    }

    pub fn reset(&mut self) {
        self.baseline = None;
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }
}
