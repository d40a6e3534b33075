//! The guest OVERLAPPED structure.
//!
//! ```text
//!            32-bit   64-bit
//! Internal        0        0   status, Pending until delivery
//! InternalHigh    4        8   bytes transferred
//! Offset          8       16
//! OffsetHigh     12       20
//! hEvent         16       24
//! size           20       32
//! ```

use crossing_core::{GuestAddr, HostAddr, HostMemory, HostMemoryExt, PointerWidth, Result, Status};

/// Field offsets of OVERLAPPED for one guest pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlappedLayout {
    width: PointerWidth,
}

impl OverlappedLayout {
    pub fn new(width: PointerWidth) -> Self {
        Self { width }
    }

    pub fn width(&self) -> PointerWidth {
        self.width
    }

    fn ptr(&self) -> u64 {
        self.width.bytes()
    }

    pub fn internal(&self) -> u64 {
        0
    }

    pub fn internal_high(&self) -> u64 {
        self.ptr()
    }

    pub fn offset(&self) -> u64 {
        2 * self.ptr()
    }

    pub fn offset_high(&self) -> u64 {
        2 * self.ptr() + 4
    }

    pub fn event(&self) -> u64 {
        2 * self.ptr() + 8
    }

    pub fn size(&self) -> u64 {
        3 * self.ptr() + 8
    }

    pub fn read_status(&self, memory: &dyn HostMemory, ov: HostAddr) -> Result<Status> {
        let raw = memory.read_ptr(ov.offset(self.internal()), self.width)?;
        Ok(Status::from_raw(raw as u32))
    }

    pub fn read_bytes(&self, memory: &dyn HostMemory, ov: HostAddr) -> Result<u32> {
        let raw = memory.read_ptr(ov.offset(self.internal_high()), self.width)?;
        Ok(raw as u32)
    }

    /// The 64-bit file position the operation starts at.
    pub fn read_position(&self, memory: &dyn HostMemory, ov: HostAddr) -> Result<u64> {
        let low = memory.read_u32(ov.offset(self.offset()))?;
        let high = memory.read_u32(ov.offset(self.offset_high()))?;
        Ok((u64::from(high) << 32) | u64::from(low))
    }

    /// The guest event handle named by the structure (may be null).
    pub fn read_event(&self, memory: &dyn HostMemory, ov: HostAddr) -> Result<GuestAddr> {
        Ok(GuestAddr::new(memory.read_ptr(ov.offset(self.event()), self.width)?))
    }

    pub fn write_status(&self, memory: &dyn HostMemory, ov: HostAddr, status: Status) -> Result<()> {
        memory.write_ptr(ov.offset(self.internal()), self.width, status.raw().into())
    }

    /// Store the final result. The byte count lands before the status, so a
    /// reader that sees a final status also sees the count.
    pub fn write_result(
        &self,
        memory: &dyn HostMemory,
        ov: HostAddr,
        status: Status,
        bytes: u32,
    ) -> Result<()> {
        memory.write_ptr(ov.offset(self.internal_high()), self.width, bytes.into())?;
        self.write_status(memory, ov, status)
    }
}
