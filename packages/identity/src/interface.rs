//! Interface ids, facade descriptors and wrapper classes.

use crossing_core::{HostAddr, HostMemory};
use uuid::Uuid;

use crate::error::{Error, Result};

/// GUID identifying an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceId(Uuid);

/// The root interface every facade answers to.
pub const IID_UNKNOWN: InterfaceId = InterfaceId::from_u128(0x0000_0000_0000_0000_c000_0000_0000_0046);

impl InterfaceId {
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Read an interface id in its in-memory GUID layout.
    pub fn read_from(memory: &dyn HostMemory, addr: HostAddr) -> crossing_core::Result<Self> {
        let mut bytes = [0u8; 16];
        memory.read(addr, &mut bytes)?;
        Ok(Self(Uuid::from_bytes_le(bytes)))
    }

    pub fn to_bytes_le(&self) -> [u8; 16] {
        self.0.to_bytes_le()
    }
}

impl std::fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.braced())
    }
}

/// One facade a wrapper exposes.
#[derive(Debug)]
pub struct FacadeDesc {
    /// The most derived interface of the facade.
    pub primary: InterfaceId,
    /// Interfaces the primary inherits from.
    pub inherits: &'static [InterfaceId],
}

impl FacadeDesc {
    pub const fn new(primary: InterfaceId, inherits: &'static [InterfaceId]) -> Self {
        Self { primary, inherits }
    }

    /// Whether a QueryInterface for `iid` lands on this facade.
    pub fn answers(&self, iid: InterfaceId) -> bool {
        self.primary == iid || self.inherits.contains(&iid)
    }
}

/// The shape of a wrapper: its facades, in a fixed order.
///
/// ```rust
/// use crossing_identity::{FacadeDesc, InterfaceId, WrapperClass, IID_UNKNOWN};
///
/// const VIEW: InterfaceId = InterfaceId::from_u128(0x11);
/// const VIEW_V10: InterfaceId = InterfaceId::from_u128(0x10);
///
/// static SHADER_VIEW: WrapperClass = WrapperClass::new(
///     "shader-resource-view",
///     &[
///         FacadeDesc::new(VIEW, &[IID_UNKNOWN]),
///         FacadeDesc::new(VIEW_V10, &[IID_UNKNOWN]),
///     ],
/// );
///
/// assert_eq!(SHADER_VIEW.facade_for(VIEW_V10), Some(1));
/// // Inherited interfaces resolve to the first facade that has them.
/// assert_eq!(SHADER_VIEW.facade_for(IID_UNKNOWN), Some(0));
/// ```
#[derive(Debug)]
pub struct WrapperClass {
    pub name: &'static str,
    pub facades: &'static [FacadeDesc],
}

impl WrapperClass {
    /// Upper bound on facades per wrapper.
    pub const MAX_FACADES: usize = 4;

    pub const fn new(name: &'static str, facades: &'static [FacadeDesc]) -> Self {
        Self { name, facades }
    }

    /// Index of the facade that answers `iid`.
    pub fn facade_for(&self, iid: InterfaceId) -> Option<usize> {
        self.facades.iter().position(|f| f.answers(iid))
    }

    pub fn validate(&self) -> Result<()> {
        if self.facades.is_empty() || self.facades.len() > Self::MAX_FACADES {
            return Err(Error::InvalidClass(self.name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collection_literals::btree;

    const RESOURCE: InterfaceId = InterfaceId::from_u128(0x100);
    const DEVICE_CHILD: InterfaceId = InterfaceId::from_u128(0x101);
    const VIEW: InterfaceId = InterfaceId::from_u128(0x102);
    const VIEW_V10: InterfaceId = InterfaceId::from_u128(0x103);
    const VIEW_V10_1: InterfaceId = InterfaceId::from_u128(0x104);
    const UNRELATED: InterfaceId = InterfaceId::from_u128(0x999);

    static CLASS: WrapperClass = WrapperClass::new(
        "view",
        &[
            FacadeDesc::new(VIEW, &[RESOURCE, DEVICE_CHILD, IID_UNKNOWN]),
            FacadeDesc::new(VIEW_V10_1, &[VIEW_V10, DEVICE_CHILD, IID_UNKNOWN]),
        ],
    );

    #[test]
    fn every_inherited_interface_has_a_facade() {
        let expected = btree! {
            VIEW => 0usize,
            RESOURCE => 0,
            DEVICE_CHILD => 0,
            IID_UNKNOWN => 0,
            VIEW_V10 => 1,
            VIEW_V10_1 => 1,
        };
        for (iid, index) in expected {
            assert_eq!(CLASS.facade_for(iid), Some(index), "{}", iid);
        }
        assert_eq!(CLASS.facade_for(UNRELATED), None);
    }

    #[test]
    fn class_bounds() {
        CLASS.validate().unwrap();

        static EMPTY: WrapperClass = WrapperClass::new("empty", &[]);
        assert!(matches!(EMPTY.validate(), Err(Error::InvalidClass("empty"))));
    }

    #[test]
    fn unknown_iid_constant() {
        assert_eq!(
            IID_UNKNOWN.to_string(),
            "{00000000-0000-0000-c000-000000000046}"
        );
    }
}
