//! Live process resource sampling through the proc filesystem.
//!
//! The supervisor inside each sandbox container polls the resident-set size
//! of the process it is monitoring at a ~10ms cadence and enforces the
//! execution memory cap against the sampled values. Reading
//! `/proc/<pid>/stat` is cheap enough that the cadence costs nothing
//! measurable while catching allocation spikes well before the container
//! level cap would.

use std::fs;
use std::time::Duration;

use once_cell::sync::Lazy;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::mem::MemSize;

/// Cadence at which the streaming sampler reads the stat record.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

const DEFAULT_PAGE_SIZE: u64 = 4096;
const DEFAULT_CLOCK_TICK: u64 = 100;

/// System page size, read once at startup. RSS in the stat record is
/// reported in pages.
static PAGE_SIZE: Lazy<u64> = Lazy::new(|| sysconf_or(libc_page_size, DEFAULT_PAGE_SIZE));

/// Clock ticks per second, read once at startup. Processor-time fields in
/// the stat record are reported in ticks.
static CLOCK_TICK: Lazy<u64> = Lazy::new(|| sysconf_or(libc_clock_tick, DEFAULT_CLOCK_TICK));

#[cfg(unix)]
fn libc_page_size() -> i64 {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) }
}

#[cfg(unix)]
fn libc_clock_tick() -> i64 {
    unsafe { libc::sysconf(libc::_SC_CLK_TCK) }
}

#[cfg(not(unix))]
fn libc_page_size() -> i64 {
    -1
}

#[cfg(not(unix))]
fn libc_clock_tick() -> i64 {
    -1
}

fn sysconf_or(read: fn() -> i64, fallback: u64) -> u64 {
    match read() {
        value if value > 0 => value as u64,
        _ => fallback,
    }
}

pub fn page_size() -> u64 {
    *PAGE_SIZE
}

pub fn clock_tick() -> u64 {
    *CLOCK_TICK
}

#[derive(Error, Debug)]
pub enum PidError {
    /// The stat record for the pid cannot be read, either because the
    /// process has exited or because it was never visible to this process.
    #[error("process {0} is gone or has no readable stat record")]
    ProcessGone(u32),
}

/// A single point-in-time reading for a monitored process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessStats {
    /// Processor usage placeholder. Deriving a meaningful percentage needs
    /// two readings spaced in time; the enforcement path only consumes
    /// memory so this stays at zero.
    pub cpu: f64,
    /// Current resident-set size.
    pub memory: MemSize,
}

/// Read the current statistics for a pid from its stat record.
pub fn stat(pid: u32) -> Result<ProcessStats, PidError> {
    let raw = fs::read_to_string(format!("/proc/{pid}/stat"))
        .map_err(|_| PidError::ProcessGone(pid))?;

    parse_stat_record(&raw)
        .map(|rss_pages| ProcessStats {
            cpu: 0.0,
            memory: MemSize::from_bytes(rss_pages * page_size()),
        })
        .ok_or(PidError::ProcessGone(pid))
}

/// Extract the RSS page count (field 24) from a raw stat record.
///
/// The command field may itself contain spaces and parentheses, so the
/// record is split on the *last* closing parenthesis; field indices are
/// relative to the first whitespace-separated field after that split
/// (field 3, the process state).
fn parse_stat_record(raw: &str) -> Option<u64> {
    let (_, after_command) = raw.rsplit_once(')')?;
    let fields: Vec<&str> = after_command.split_whitespace().collect();

    // state is field 3 and sits at index 0, so field 24 sits at index 21.
    fields.get(21)?.parse().ok()
}

/// Stream statistics for a pid at [`SAMPLE_INTERVAL`] cadence until the
/// cancellation signal fires (the sender side of `cancel` completes or is
/// dropped). Individual read failures are skipped rather than terminating
/// the stream, since the monitored process can be mid-exec or briefly
/// unreadable. The returned sequence is finite and not restartable.
pub fn stream(pid: u32, mut cancel: oneshot::Receiver<()>) -> mpsc::Receiver<ProcessStats> {
    let (samples_tx, samples_rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);

        loop {
            tokio::select! {
                _ = &mut cancel => break,
                _ = ticker.tick() => {
                    let Ok(stats) = stat(pid) else {
                        continue;
                    };

                    if samples_tx.send(stats).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    samples_rx
}
