//! Access to guest-visible memory from the host.
//!
//! Every accessor takes a [`HostAddr`]: a guest address has to pass through
//! the [`AddressTranslator`](crate::AddressTranslator) before it can be read
//! or written.

use std::sync::RwLock;

use crate::addr::{HostAddr, PointerWidth};
use crate::error::{Error, Result};

/// Byte-level access to memory shared with the guest.
pub trait HostMemory: Send + Sync {
    /// Fill `buf` from `addr`.
    fn read(&self, addr: HostAddr, buf: &mut [u8]) -> Result<()>;

    /// Copy `data` to `addr`.
    fn write(&self, addr: HostAddr, data: &[u8]) -> Result<()>;
}

/// Typed little-endian helpers over [`HostMemory`].
pub trait HostMemoryExt: HostMemory {
    fn read_u32(&self, addr: HostAddr) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&self, addr: HostAddr) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read(addr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u32(&self, addr: HostAddr, value: u32) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    fn write_u64(&self, addr: HostAddr, value: u64) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    /// Read a pointer-sized field of the given width, zero-extended.
    fn read_ptr(&self, addr: HostAddr, width: PointerWidth) -> Result<u64> {
        match width {
            PointerWidth::Bits32 => self.read_u32(addr).map(u64::from),
            PointerWidth::Bits64 => self.read_u64(addr),
        }
    }

    /// Write a pointer-sized field of the given width.
    fn write_ptr(&self, addr: HostAddr, width: PointerWidth, value: u64) -> Result<()> {
        match width {
            PointerWidth::Bits32 => self.write_u32(addr, value as u32),
            PointerWidth::Bits64 => self.write_u64(addr, value),
        }
    }

    /// Read `len` bytes into a new buffer.
    fn read_vec(&self, addr: HostAddr, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read(addr, &mut buf)?;
        Ok(buf)
    }
}

impl<T: HostMemory + ?Sized> HostMemoryExt for T {}

/// A contiguous region of guest RAM, mapped at a fixed host address.
///
/// Accesses outside `[base, base + len)` fault instead of touching anything.
#[derive(Debug)]
pub struct GuestRam {
    base: HostAddr,
    bytes: RwLock<Vec<u8>>,
}

impl GuestRam {
    /// Map `len` zeroed bytes at `base`.
    pub fn new(base: HostAddr, len: usize) -> Self {
        Self {
            base,
            bytes: RwLock::new(vec![0u8; len]),
        }
    }

    pub fn base(&self) -> HostAddr {
        self.base
    }

    pub fn len(&self) -> usize {
        self.bytes.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn range(&self, addr: HostAddr, len: usize, size: usize) -> Result<std::ops::Range<usize>> {
        let fault = || Error::Fault {
            addr: addr.raw(),
            len,
        };
        let start = addr.raw().checked_sub(self.base.raw()).ok_or_else(fault)?;
        let start = usize::try_from(start).map_err(|_| fault())?;
        let end = start.checked_add(len).ok_or_else(fault)?;
        if end > size || addr.is_null() {
            return Err(fault());
        }
        Ok(start..end)
    }
}

impl HostMemory for GuestRam {
    fn read(&self, addr: HostAddr, buf: &mut [u8]) -> Result<()> {
        let bytes = self
            .bytes
            .read()
            .map_err(|_| Error::Poisoned("guest ram"))?;
        let range = self.range(addr, buf.len(), bytes.len())?;
        buf.copy_from_slice(&bytes[range]);
        Ok(())
    }

    fn write(&self, addr: HostAddr, data: &[u8]) -> Result<()> {
        let mut bytes = self
            .bytes
            .write()
            .map_err(|_| Error::Poisoned("guest ram"))?;
        let range = self.range(addr, data.len(), bytes.len())?;
        bytes[range].copy_from_slice(data);
        Ok(())
    }
}
