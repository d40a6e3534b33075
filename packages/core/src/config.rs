//! Bridge configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::addr::PointerWidth;
use crate::error::{Error, Result};

/// Bytes reserved per wrapper in the wrapper heap.
pub const WRAPPER_STRIDE: u64 = 64;

/// Bytes between consecutive facades of one wrapper.
pub const FACADE_STRIDE: u64 = 8;

/// Configuration for an assembled bridge.
///
/// Every field has a default, so a config file only names what it changes:
///
/// ```rust
/// use crossing_core::{BridgeConfig, PointerWidth};
///
/// let config = BridgeConfig::from_json(r#"{ "guest_width": "bits32", "workers": 2 }"#).unwrap();
/// assert_eq!(config.guest_width, PointerWidth::Bits32);
/// assert_eq!(config.workers, 2);
/// assert_eq!(config.queue_depth, BridgeConfig::default().queue_depth);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Pointer width of the guest.
    pub guest_width: PointerWidth,

    /// Host address where guest address zero is mapped.
    pub guest_base: u64,

    /// Bytes of guest RAM backing the guest window.
    pub guest_ram_size: u64,

    /// Guest address of the first wrapper slot.
    pub wrapper_heap_base: u64,

    /// Maximum number of live wrappers.
    pub max_wrappers: usize,

    /// Number of identity lock stripes.
    pub identity_slots: usize,

    /// Async completion workers.
    pub workers: usize,

    /// Pending operations that may wait for a free worker.
    pub queue_depth: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            guest_width: PointerWidth::Bits32,
            guest_base: 0x7f00_0000_0000,
            guest_ram_size: 0x10_0000,
            wrapper_heap_base: 0x4000_0000,
            max_wrappers: 4096,
            identity_slots: 64,
            workers: 4,
            queue_depth: 256,
        }
    }
}

impl BridgeConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Size in bytes of the wrapper heap window.
    pub fn wrapper_heap_len(&self) -> u64 {
        (self.max_wrappers as u64).saturating_mul(WRAPPER_STRIDE)
    }

    /// Guest RAM size as a host length.
    pub fn guest_ram_len(&self) -> Result<usize> {
        usize::try_from(self.guest_ram_size).map_err(|_| {
            Error::Config(format!(
                "guest_ram_size {:#x} does not fit the host",
                self.guest_ram_size
            ))
        })
    }

    /// Check the config describes a usable bridge.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("guest_ram_size", self.guest_ram_len()?),
            ("max_wrappers", self.max_wrappers),
            ("identity_slots", self.identity_slots),
            ("workers", self.workers),
            ("queue_depth", self.queue_depth),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be nonzero")));
            }
        }
        if self.wrapper_heap_base == 0 {
            return Err(Error::Config("wrapper_heap_base must not be null".into()));
        }

        let limit = self.guest_width.mask();
        if self.guest_ram_size - 1 > limit {
            return Err(Error::Config(format!(
                "guest_ram_size {:#x} exceeds a {:?} guest",
                self.guest_ram_size, self.guest_width
            )));
        }
        let heap_end = self
            .wrapper_heap_base
            .checked_add(self.wrapper_heap_len() - 1)
            .filter(|end| *end <= limit);
        if heap_end.is_none() {
            return Err(Error::Config(format!(
                "wrapper heap at {:#x} ({} slots) exceeds a {:?} guest",
                self.wrapper_heap_base, self.max_wrappers, self.guest_width
            )));
        }
        Ok(())
    }
}
