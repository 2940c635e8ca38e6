// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Human-readable byte sizes.
//!
//! [`ByteSize`] is used wherever a size is typed by a person: simulated
//! device capacities and block sizes on the command line, and the MiB-based
//! configuration fields.

use crate::AllocError;
use std::fmt;

/// Bytes per mebibyte. Configuration `*_mb` fields use this unit.
pub const MIB: u64 = 1 << 20;

/// Converts a MiB count to bytes, saturating on overflow.
pub fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(MIB)
}

/// A size in bytes.
///
/// # Parsing
/// Binary suffixes, case-insensitive, optional trailing `B`:
/// - `"512M"` or `"512MB"` → 512 × 1024² bytes
/// - `"16G"` or `"16GB"` → 16 × 1024³ bytes
/// - `"4K"` or `"4KB"` → 4096 bytes
/// - `"1048576"` → raw byte count
///
/// # Examples
/// ```
/// use gpu_memory::ByteSize;
///
/// assert_eq!(ByteSize::parse("16G").unwrap().as_bytes(), 16 << 30);
/// assert_eq!(ByteSize::from_mb(100).to_string(), "100 MB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ByteSize(u64);

impl ByteSize {
    pub fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn from_mb(mb: u64) -> Self {
        Self(mb_to_bytes(mb))
    }

    pub fn as_bytes(&self) -> u64 {
        self.0
    }

    /// Whole MiB, truncated.
    pub fn as_mb(&self) -> u64 {
        self.0 / MIB
    }

    /// Parses a human-readable size. Zero is allowed.
    pub fn parse(s: &str) -> Result<Self, AllocError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AllocError::Config("empty size string".into()));
        }

        let upper = s.to_ascii_uppercase();
        let digits = upper.strip_suffix('B').unwrap_or(&upper);
        let (num, multiplier) = match digits.chars().last() {
            Some('G') => (&digits[..digits.len() - 1], 1u64 << 30),
            Some('M') => (&digits[..digits.len() - 1], 1 << 20),
            Some('K') => (&digits[..digits.len() - 1], 1 << 10),
            _ => (digits, 1),
        };

        let value: u64 = num.trim().parse().map_err(|_| {
            AllocError::Config(format!(
                "invalid size '{s}': expected a number with an optional K, M or G suffix"
            ))
        })?;
        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| AllocError::Config(format!("size overflow: '{s}'")))?;
        Ok(Self(bytes))
    }

    /// Parses a comma-separated list such as `"16G,8G"`.
    pub fn parse_list(s: &str) -> Result<Vec<Self>, AllocError> {
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Self::parse)
            .collect()
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const GIB: u64 = 1 << 30;
        if self.0 >= GIB && self.0 % GIB == 0 {
            write!(f, "{} GB", self.0 / GIB)
        } else if self.0 >= MIB && self.0 % MIB == 0 {
            write!(f, "{} MB", self.0 / MIB)
        } else if self.0 >= 1024 && self.0 % 1024 == 0 {
            write!(f, "{} KB", self.0 / 1024)
        } else {
            write!(f, "{} B", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(ByteSize::parse("512M").unwrap().as_mb(), 512);
        assert_eq!(ByteSize::parse("512mb").unwrap().as_mb(), 512);
        assert_eq!(ByteSize::parse("2G").unwrap().as_bytes(), 2 << 30);
        assert_eq!(ByteSize::parse("4kb").unwrap().as_bytes(), 4096);
        assert_eq!(ByteSize::parse("100B").unwrap().as_bytes(), 100);
        assert_eq!(ByteSize::parse(" 1048576 ").unwrap().as_mb(), 1);
        assert_eq!(ByteSize::parse("0").unwrap().as_bytes(), 0);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ByteSize::parse("").is_err());
        assert!(ByteSize::parse("abc").is_err());
        assert!(ByteSize::parse("G").is_err());
        assert!(ByteSize::parse("99999999999999999999G").is_err());
    }

    #[test]
    fn test_parse_list() {
        let sizes = ByteSize::parse_list("16G, 8G,").unwrap();
        assert_eq!(sizes, vec![ByteSize::from_mb(16 * 1024), ByteSize::from_mb(8 * 1024)]);
    }

    #[test]
    fn test_display() {
        assert_eq!(ByteSize::from_mb(1024).to_string(), "1 GB");
        assert_eq!(ByteSize::from_mb(60).to_string(), "60 MB");
        assert_eq!(ByteSize::from_bytes(2048).to_string(), "2 KB");
        assert_eq!(ByteSize::from_bytes(100).to_string(), "100 B");
    }

    #[test]
    fn test_mb_to_bytes_saturates() {
        assert_eq!(mb_to_bytes(100), 100 * MIB);
        assert_eq!(mb_to_bytes(u64::MAX), u64::MAX);
    }
}
