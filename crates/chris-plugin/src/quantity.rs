//! CPU and memory quantities.
//!
//! CPU is counted in millicores and written as `"1000m"`. Memory is counted in
//! mebibytes and written as `"200Mi"`; `"Gi"`, and the decimal `"M"` / `"G"`
//! suffixes are accepted on input and converted (decimal units round up).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PluginError;

/// CPU limit in millicores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CpuQuantity(pub u32);

impl CpuQuantity {
  pub fn millicores(self) -> u32 {
    self.0
  }
}

impl FromStr for CpuQuantity {
  type Err = PluginError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || PluginError::InvalidQuantity {
      kind: "cpu",
      value: s.to_string(),
    };
    let digits = s.trim().strip_suffix('m').unwrap_or(s.trim());
    digits.parse::<u32>().map(CpuQuantity).map_err(|_| invalid())
  }
}

impl fmt::Display for CpuQuantity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}m", self.0)
  }
}

/// Memory limit in MiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MemoryQuantity(pub u32);

impl MemoryQuantity {
  pub fn mebibytes(self) -> u32 {
    self.0
  }
}

const BYTES_PER_MI: u64 = 1024 * 1024;

impl FromStr for MemoryQuantity {
  type Err = PluginError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || PluginError::InvalidQuantity {
      kind: "memory",
      value: s.to_string(),
    };
    let s = s.trim();

    // Order matters: "Mi" must be tried before "M".
    let (digits, bytes_per_unit) = if let Some(d) = s.strip_suffix("Gi") {
      (d, 1024 * BYTES_PER_MI)
    } else if let Some(d) = s.strip_suffix("Mi") {
      (d, BYTES_PER_MI)
    } else if let Some(d) = s.strip_suffix('G') {
      (d, 1_000_000_000)
    } else if let Some(d) = s.strip_suffix('M') {
      (d, 1_000_000)
    } else {
      (s, BYTES_PER_MI)
    };

    let value: u64 = digits.parse().map_err(|_| invalid())?;
    let bytes = value.checked_mul(bytes_per_unit).ok_or_else(invalid)?;
    let mebibytes = bytes.div_ceil(BYTES_PER_MI);
    u32::try_from(mebibytes)
      .map(MemoryQuantity)
      .map_err(|_| invalid())
  }
}

impl fmt::Display for MemoryQuantity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}Mi", self.0)
  }
}

macro_rules! string_serde {
  ($ty:ty) => {
    impl Serialize for $ty {
      fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
      }
    }

    impl<'de> Deserialize<'de> for $ty {
      fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
      }
    }
  };
}

string_serde!(CpuQuantity);
string_serde!(MemoryQuantity);
