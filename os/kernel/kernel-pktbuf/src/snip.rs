//! # Packet Snippets
//!
//! A packet is a chain of snippets, outermost layer first:
//!
//! ```text
//!  Snip ──next──▶ Snip ──next──▶ Snip ──next──▶ Snip
//!  Ethernet       Ipv6           Udp            Unknown (payload)
//!  size = 14      size = 40      size = 8       size = 54
//!     │              │              │              │
//!     ▼              ▼              ▼              ▼
//!  ┌──────────────────────────────────────────────────────┐
//!  │                  packet buffer arena                 │
//!  └──────────────────────────────────────────────────────┘
//! ```
//!
//! The snippet record (next, data, size, type) lives in the record pool of a
//! [`PktBuf`](crate::PktBuf); callers only ever hold a [`Snip`] handle.

use crate::error::PktBufError;

/// Size of a single snippet in bytes.
pub type PktSize = u16;

/// Largest possible snippet.
pub const PKTSIZE_MAX: PktSize = PktSize::MAX;

/// Protocol of the bytes a snippet represents.
///
/// The discriminants are the boundary contract with link and protocol layers
/// and are preserved across headers, inserts and duplication.
#[repr(u16)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ProtoType {
    /// Type was not specified.
    #[default]
    Unknown = 0x0000,
    /// Radio frame.
    Radio = 0x0001,
    Ethernet = 0x0002,
    /// IEEE 802.15.4 beacon frame.
    Ieee802154Beacon = 0x0003,
    /// IEEE 802.15.4 data frame.
    Ieee802154Data = 0x0004,
    /// IEEE 802.15.4 acknowledgment frame.
    Ieee802154Ack = 0x0005,
    /// IEEE 802.15.4 MAC command frame.
    Ieee802154MacCmd = 0x0006,
    /// Bluetooth Low-Energy.
    Btle = 0x0007,
    /// CC110x frame format.
    Cc110x = 0x0008,
    SixLowpan = 0x0009,
    Ipv4 = 0x000a,
    Ipv6 = 0x000b,
    Udp = 0x000c,
    Tcp = 0x000d,
    /// CCN lite.
    Ccnl = 0x000e,
}

impl ProtoType {
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl From<ProtoType> for u16 {
    fn from(value: ProtoType) -> Self {
        value.as_u16()
    }
}

impl TryFrom<u16> for ProtoType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0x0000 => Self::Unknown,
            0x0001 => Self::Radio,
            0x0002 => Self::Ethernet,
            0x0003 => Self::Ieee802154Beacon,
            0x0004 => Self::Ieee802154Data,
            0x0005 => Self::Ieee802154Ack,
            0x0006 => Self::Ieee802154MacCmd,
            0x0007 => Self::Btle,
            0x0008 => Self::Cc110x,
            0x0009 => Self::SixLowpan,
            0x000a => Self::Ipv4,
            0x000b => Self::Ipv6,
            0x000c => Self::Udp,
            0x000d => Self::Tcp,
            0x000e => Self::Ccnl,
            other => return Err(other),
        })
    }
}

/// Handle to a snippet record of a [`PktBuf`](crate::PktBuf).
///
/// The generation is bumped every time a record is destroyed, so a handle
/// that outlives its snippet is rejected with
/// [`StaleSnip`](crate::PktBufError::StaleSnip) instead of aliasing whatever
/// snippet reuses the record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Snip {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Snip {
    /// Position of the record in the pool.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }
}

/// Where the bytes of a new header come from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HeaderData<'a> {
    /// Allocate fresh space; its contents are unspecified.
    Empty,
    /// Allocate fresh space and copy the first `size` bytes of the slice.
    Bytes(&'a [u8]),
    /// Carve the header from the front of the packet's own data without copying.
    Front,
}

/// Data of a snippet: arena-managed, or borrowed from the caller for good.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum SnipData<P> {
    Arena(P),
    External(&'static [u8]),
}

/// The record behind a [`Snip`] handle.
#[derive(Debug, Copy, Clone)]
pub(crate) struct SnipRecord<P> {
    pub(crate) next: Option<Snip>,
    pub(crate) data: SnipData<P>,
    pub(crate) size: PktSize,
    pub(crate) proto: ProtoType,
}

/// Convert a byte length into a [`PktSize`].
pub(crate) fn pkt_size(len: usize) -> Result<PktSize, PktBufError> {
    PktSize::try_from(len).map_err(|_| PktBufError::TooLarge(len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proto_roundtrips_through_wire_value() {
        assert_eq!(ProtoType::try_from(0x000b), Ok(ProtoType::Ipv6));
        assert_eq!(u16::from(ProtoType::Udp), 0x000c);
        assert_eq!(ProtoType::try_from(0x00ff), Err(0x00ff));
        assert_eq!(ProtoType::default(), ProtoType::Unknown);
    }

    #[test]
    fn size_limit_is_sixteen_bits() {
        assert_eq!(pkt_size(65_535), Ok(PKTSIZE_MAX));
        assert_eq!(pkt_size(65_536), Err(PktBufError::TooLarge(65_536)));
    }
}
