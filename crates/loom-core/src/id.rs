//! Identifier types for LOOM
//!
//! Component identifiers are 128-bit digests derived from creation facts,
//! so two identities created within one process never collide in practice.
//! Every other identifier is a 64-bit value scoped to its owner.

use std::fmt;

/// Component identity - truncated SHA-256 digest of its creation facts
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ComponentId(pub u128);

impl ComponentId {
    pub const ZERO: ComponentId = ComponentId(0);

    #[inline]
    pub fn new(id: u128) -> Self {
        ComponentId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        ComponentId(u128::from_be_bytes(bytes))
    }

    /// Leading 8 hex characters, used in addresses and log lines
    pub fn short(self) -> String {
        format!("{:08x}", (self.0 >> 96) as u32)
    }

    /// Full 32-character hex rendering
    pub fn to_hex(self) -> String {
        format!("{:032x}", self.0)
    }

    /// Parse the rendering produced by [`ComponentId::to_hex`]
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 32 {
            return None;
        }
        u128::from_str_radix(hex, 16).ok().map(ComponentId)
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Component({})", self.short())
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

macro_rules! scoped_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub u64);

        impl $name {
            pub const ZERO: $name = $name(0);

            #[inline]
            pub fn new(id: u64) -> Self {
                $name(id)
            }

            #[inline]
            pub fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({:016x})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:016x}", self.0)
            }
        }
    };
}

scoped_id!(
    /// Composite identity - random, assigned at construction
    CompositeId,
    "Composite"
);

scoped_id!(
    /// Machine identity - random, assigned at construction
    MachineId,
    "Machine"
);

scoped_id!(
    /// Connection identity - sequential within its composite
    ConnectionId,
    "Connection"
);

scoped_id!(
    /// Listener registration handle - sequential within its dispatcher
    ListenerId,
    "Listener"
);

scoped_id!(
    /// Event sequence number - assigned by the dispatcher on publish
    EventId,
    "Event"
);

impl CompositeId {
    pub fn generate() -> Self {
        CompositeId(rand::random())
    }
}

impl MachineId {
    pub fn generate() -> Self {
        MachineId(rand::random())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_id_roundtrip() {
        let id = ComponentId::new(0x0123_4567_89ab_cdef_fedc_ba98_7654_3210);
        assert_eq!(ComponentId::from_bytes(id.to_bytes()), id);
        assert_eq!(ComponentId::from_hex(&id.to_hex()), Some(id));
    }

    #[test]
    fn test_component_id_short() {
        let id = ComponentId::new(0xdead_beef_0000_0000_0000_0000_0000_0001);
        assert_eq!(id.short(), "deadbeef");
        assert_eq!(format!("{:?}", id), "Component(deadbeef)");
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert_eq!(ComponentId::from_hex("abc"), None);
        assert_eq!(ComponentId::from_hex(&"z".repeat(32)), None);
    }

    #[test]
    fn test_scoped_id_format() {
        let id = ConnectionId::new(42);
        assert_eq!(format!("{}", id), "000000000000002a");
        assert_eq!(format!("{:?}", id), "Connection(000000000000002a)");
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(CompositeId::generate(), CompositeId::generate());
        assert_ne!(MachineId::generate(), MachineId::generate());
    }
}
