//! # Packet Buffer Configuration
//!
//! The arena backend is fixed at build time by the `PKTBUF_SIZE` environment
//! variable (see `build.rs`):
//!
//! * `PKTBUF_SIZE > 0` selects [`StaticArena`] with exactly that many bytes,
//! * `PKTBUF_SIZE == 0` selects `DynamicArena` on top of `SystemHeap`, which
//!   needs the `alloc` feature.
//!
//! The size of the snippet record pool is the `SNIPS` parameter of
//! [`PktBuf`](crate::PktBuf), [`DEFAULT_MAX_SNIPS`] unless given.

#[cfg(all(pktbuf_dynamic, feature = "alloc"))]
use crate::{dynamic_arena::DynamicArena, heap::SystemHeap};

#[cfg(all(pktbuf_dynamic, not(feature = "alloc")))]
compile_error!("PKTBUF_SIZE=0 selects the heap backend, which needs the `alloc` feature");

#[cfg(not(pktbuf_dynamic))]
use crate::static_arena::StaticArena;

/// Capacity of the packet buffer in bytes; `0` means "use the heap".
pub const PKTBUF_SIZE: usize = parse_usize(env!("PKTBUF_SIZE"));

/// Region sizes are rounded up to this boundary so descriptor headers stay aligned.
pub const ALIGNMENT: usize = 4;

/// Default number of snippet records a [`PktBuf`](crate::PktBuf) can hold at once.
pub const DEFAULT_MAX_SNIPS: usize = 64;

/// The backend selected by [`PKTBUF_SIZE`].
#[cfg(not(pktbuf_dynamic))]
pub type DefaultBackend = StaticArena<PKTBUF_SIZE>;

/// The backend selected by [`PKTBUF_SIZE`].
#[cfg(all(pktbuf_dynamic, feature = "alloc"))]
pub type DefaultBackend = DynamicArena<SystemHeap>;

const _: () = {
    assert!(ALIGNMENT.is_power_of_two());
    assert!(PKTBUF_SIZE.is_multiple_of(ALIGNMENT));
    assert!(DEFAULT_MAX_SNIPS > 0);
    assert!(DEFAULT_MAX_SNIPS <= u32::MAX as usize);
};

/// Parse the decimal value forwarded by `build.rs`.
#[allow(clippy::cast_lossless)]
const fn parse_usize(digits: &str) -> usize {
    let bytes = digits.as_bytes();
    let mut value = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        let d = bytes[i];
        assert!(d.is_ascii_digit(), "PKTBUF_SIZE must be decimal");
        value = value * 10 + (d - b'0') as usize;
        i += 1;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_capacity() {
        assert_eq!(parse_usize("0"), 0);
        assert_eq!(parse_usize("6144"), 6144);
    }
}
