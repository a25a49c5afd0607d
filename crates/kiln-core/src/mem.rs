//! Typed byte quantities used for every limit, measurement and report.
//!
//! All views are 1024-based. The type serializes transparently as a plain
//! byte count so it can cross the runner document boundary unchanged.

use std::fmt;
use std::ops::{Add, Mul};

use serde::{Deserialize, Serialize};

pub const BYTE: MemSize = MemSize(1);
pub const KIBIBYTE: MemSize = MemSize(1024);
pub const MEBIBYTE: MemSize = MemSize(1024 * 1024);
pub const GIBIBYTE: MemSize = MemSize(1024 * 1024 * 1024);

/// An integer byte count with KiB/MiB/GiB views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemSize(u64);

impl MemSize {
    pub const fn from_bytes(bytes: u64) -> Self {
        MemSize(bytes)
    }

    pub const fn from_kibibytes(kib: u64) -> Self {
        MemSize(kib * 1024)
    }

    pub const fn from_mebibytes(mib: u64) -> Self {
        MemSize(mib * 1024 * 1024)
    }

    pub const fn from_gibibytes(gib: u64) -> Self {
        MemSize(gib * 1024 * 1024 * 1024)
    }

    pub const fn bytes(self) -> u64 {
        self.0
    }

    pub const fn kibibytes(self) -> u64 {
        self.0 / 1024
    }

    pub const fn mebibytes(self) -> u64 {
        self.0 / (1024 * 1024)
    }

    pub const fn gibibytes(self) -> u64 {
        self.0 / (1024 * 1024 * 1024)
    }

    /// Fractional MiB view, used for reporting and log output.
    pub fn mebibytes_f64(self) -> f64 {
        self.0 as f64 / (1024.0 * 1024.0)
    }

    /// Byte count as the signed quantity the Docker API expects for
    /// container resource caps.
    pub const fn docker_bytes(self) -> i64 {
        self.0 as i64
    }
}

impl Mul<u64> for MemSize {
    type Output = MemSize;

    fn mul(self, rhs: u64) -> MemSize {
        MemSize(self.0 * rhs)
    }
}

impl Add for MemSize {
    type Output = MemSize;

    fn add(self, rhs: MemSize) -> MemSize {
        MemSize(self.0 + rhs.0)
    }
}

impl fmt::Display for MemSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}MiB", self.mebibytes_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_are_1024_based() {
        let size = MemSize::from_gibibytes(2);
        assert_eq!(size.bytes(), 2 * 1024 * 1024 * 1024);
        assert_eq!(size.mebibytes(), 2048);
        assert_eq!(size.kibibytes(), 2 * 1024 * 1024);
        assert_eq!(size.gibibytes(), 2);
    }

    #[test]
    fn truncating_views_round_down() {
        let size = MemSize::from_bytes(MEBIBYTE.bytes() + 512 * 1024);
        assert_eq!(size.mebibytes(), 1);
        assert!((size.mebibytes_f64() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn ordering_compares_byte_counts() {
        assert!(KIBIBYTE < MEBIBYTE);
        assert!(MEBIBYTE * 6 > MEBIBYTE * 5);
        assert_eq!(KIBIBYTE * 1024, MEBIBYTE);
    }

    #[test]
    fn serializes_as_plain_byte_count() {
        let encoded = serde_json::to_string(&MemSize::from_mebibytes(50)).unwrap();
        assert_eq!(encoded, "52428800");

        let decoded: MemSize = serde_json::from_str("52428800").unwrap();
        assert_eq!(decoded, MemSize::from_mebibytes(50));
    }
}
