#![cfg(feature = "alloc")]

use core::ptr::NonNull;
use kernel_pktbuf::{
    Backend, ChunkPtr, DynamicArena, HeaderData, LimitedHeap, PktBuf, PktBufError, PktSize,
    ProtoType, Snip, SystemHeap,
};
use proptest::prelude::*;

type Arena = DynamicArena<LimitedHeap>;
type Buf = PktBuf<Arena>;

fn pktbuf(budget: usize) -> Buf {
    PktBuf::new(DynamicArena::new(LimitedHeap::new(SystemHeap, budget)))
}

fn bytes_of(buf: &Buf, snip: Snip) -> Vec<u8> {
    buf.read(snip, <[u8]>::to_vec).unwrap()
}

/// `insert(data, 16)` followed by a 4 byte in-place header.
fn carved_packet(buf: &Buf) -> (Snip, Snip, ChunkPtr) {
    let payload = buf.insert(Some(b"HDR!0123456789ab"), 16).unwrap();
    let base = buf.data_ptr(payload).unwrap().unwrap();
    let header = buf
        .add_header(Some(payload), HeaderData::Front, 4, ProtoType::Ieee802154Data)
        .unwrap();
    (header, payload, base)
}

#[test]
fn in_place_header_reuses_heap_block() {
    let buf = pktbuf(4096);
    let (header, payload, base) = carved_packet(&buf);

    assert_eq!(buf.next(header), Ok(Some(payload)));
    assert_eq!(buf.size(header), Ok(4));
    assert_eq!(buf.size(payload), Ok(12));
    assert_eq!(buf.data_ptr(header), Ok(Some(base)));
    assert_eq!(buf.data_ptr(payload), Ok(Some(Arena::offset(base, 4))));
    assert_eq!(bytes_of(&buf, header), b"HDR!");
    assert_eq!(bytes_of(&buf, payload), b"0123456789ab");

    let stats = buf.stats();
    assert_eq!(stats.arena.regions, 1);
    assert_eq!(stats.arena.in_use, 16);

    buf.release(payload).unwrap();
    buf.release(header).unwrap();
    assert!(buf.is_empty());
}

#[test]
fn header_released_first_keeps_base_block() {
    let buf = pktbuf(4096);
    let (header, payload, base) = carved_packet(&buf);
    let chunk = buf.data_ptr(payload).unwrap().unwrap();

    buf.release(header).unwrap();
    assert_eq!(buf.stats().arena.regions, 1);
    assert!(buf.contains(chunk));
    assert_eq!(bytes_of(&buf, payload), b"0123456789ab");

    buf.release(payload).unwrap();
    assert_eq!(buf.stats().arena.regions, 0);
    assert!(!buf.contains(chunk));
    assert!(!buf.contains(base));
    assert!(buf.is_empty());
}

#[test]
fn contains_only_tracked_pointers() {
    let buf = pktbuf(4096);
    let snip = buf.alloc(32).unwrap();
    let ptr = buf.data_ptr(snip).unwrap().unwrap();
    assert!(buf.contains(ptr));
    assert!(!buf.contains(Arena::offset(ptr, 1)));

    let local = [0u8; 4];
    assert!(!buf.contains(ChunkPtr::from(NonNull::from(&local[0]))));

    buf.release(snip).unwrap();
    assert!(!buf.contains(ptr));
}

#[test]
fn heap_exhaustion_is_reported() {
    let buf = pktbuf(64);
    let a = buf.alloc(64).unwrap();
    assert_eq!(buf.alloc(1), Err(PktBufError::OutOfMemory));
    assert_eq!(buf.stats().snips, 1);

    buf.release(a).unwrap();
    let b = buf.alloc(64).unwrap();
    buf.release(b).unwrap();
    assert!(buf.is_empty());
}

#[test]
fn full_chunk_table_rolls_back_allocation() {
    let arena = DynamicArena::new(LimitedHeap::new(SystemHeap, 4096)).with_max_ranges(2);
    let buf: Buf = PktBuf::new(arena);

    let a = buf.alloc(10).unwrap();
    let b = buf.alloc(10).unwrap();
    let before = buf.stats();

    assert_eq!(buf.alloc(10), Err(PktBufError::OutOfMemory));
    assert_eq!(buf.stats(), before);

    buf.release(a).unwrap();
    buf.release(b).unwrap();
    assert!(buf.is_empty());
}

#[test]
fn start_write_duplicates_carved_chain() {
    let buf = pktbuf(4096);
    let (header, payload, _) = carved_packet(&buf);
    buf.hold(header).unwrap();

    let copy = buf.start_write(header).unwrap();
    let copied_payload = buf.next(copy).unwrap().unwrap();
    assert_eq!(buf.stats().arena.regions, 3);
    assert_eq!(buf.proto(copy), Ok(ProtoType::Ieee802154Data));
    assert_eq!(bytes_of(&buf, copy), b"HDR!");
    assert_eq!(bytes_of(&buf, copied_payload), b"0123456789ab");

    buf.write(copied_payload, |bytes| bytes.fill(b'x')).unwrap();
    assert_eq!(bytes_of(&buf, payload), b"0123456789ab");

    for snip in [copy, copied_payload, header, payload] {
        buf.release(snip).unwrap();
    }
    assert!(buf.is_empty());
}

#[test]
fn start_write_out_of_heap_keeps_original() {
    let buf = pktbuf(24);
    let (header, payload, _) = carved_packet(&buf);
    buf.hold(header).unwrap();

    // The header copy fits, the payload copy does not.
    assert_eq!(buf.start_write(header), Err(PktBufError::OutOfMemory));
    assert_eq!(buf.users(header), Ok(2));
    assert_eq!(buf.stats().snips, 2);
    assert_eq!(buf.stats().arena.regions, 1);

    buf.release(header).unwrap();
    buf.release(header).unwrap();
    buf.release(payload).unwrap();
    assert!(buf.is_empty());
}

#[test]
fn realloc_data_grows_heap_block() {
    let buf = pktbuf(4096);
    let snip = buf.insert(Some(b"grow"), 4).unwrap();

    buf.realloc_data(snip, 1000).unwrap();
    assert_eq!(buf.size(snip), Ok(1000));
    assert_eq!(bytes_of(&buf, snip)[..4], *b"grow");
    assert_eq!(buf.stats().arena.in_use, 1000);

    assert_eq!(buf.realloc_data(snip, 5000), Err(PktBufError::OutOfMemory));
    assert_eq!(buf.size(snip), Ok(1000));

    buf.release(snip).unwrap();
    assert!(buf.is_empty());
}

#[test]
fn realloc_data_of_sub_chunk_moves_it() {
    let buf = pktbuf(4096);
    let (header, payload, base) = carved_packet(&buf);

    buf.realloc_data(payload, 24).unwrap();
    let moved = buf.data_ptr(payload).unwrap().unwrap();
    assert_ne!(moved, Arena::offset(base, 4));
    assert_eq!(buf.stats().arena.regions, 2);
    assert_eq!(bytes_of(&buf, payload)[..12], *b"0123456789ab");
    assert_eq!(bytes_of(&buf, header), b"HDR!");

    buf.release(header).unwrap();
    assert_eq!(buf.stats().arena.regions, 1);
    buf.release(payload).unwrap();
    assert!(buf.is_empty());
}

#[test]
fn stats_track_peak_usage() {
    let buf = pktbuf(4096);
    let a = buf.alloc(100).unwrap();
    let b = buf.alloc(200).unwrap();
    buf.release(a).unwrap();

    let stats = buf.stats().arena;
    assert_eq!(stats.capacity, 0);
    assert_eq!(stats.in_use, 200);
    assert_eq!(stats.peak, 300);

    buf.release(b).unwrap();
    buf.reset();
    assert!(buf.is_empty());
}

#[test]
fn unwritten_memory_reads_as_zero() {
    let buf = pktbuf(4096);
    let snip = buf.alloc(16).unwrap();
    assert_eq!(buf.read(snip, |bytes| bytes.iter().map(|&b| u32::from(b)).sum::<u32>()), Ok(0));

    let blank = buf.insert(None, 8).unwrap();
    assert_eq!(bytes_of(&buf, blank), [0; 8]);

    let header = buf
        .add_header(Some(blank), HeaderData::Empty, 4, ProtoType::Udp)
        .unwrap();
    assert_eq!(bytes_of(&buf, header), [0; 4]);

    buf.write(snip, |bytes| bytes.fill(0x5a)).unwrap();
    buf.realloc_data(snip, 40).unwrap();
    let grown = bytes_of(&buf, snip);
    assert_eq!(grown[..16], [0x5a; 16]);
    assert_eq!(grown[16..], [0; 24]);

    for snip in [snip, blank, header] {
        buf.release(snip).unwrap();
    }
    assert!(buf.is_empty());
}

#[derive(Debug, Clone)]
enum Op {
    Alloc(PktSize),
    /// Carve a header off the live snippet picked by `.0`.
    Carve(usize, PktSize),
    Release(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1u16..=512).prop_map(Op::Alloc),
        1 => (any::<usize>(), 1u16..=64).prop_map(|(pick, size)| Op::Carve(pick, size)),
        2 => any::<usize>().prop_map(Op::Release),
    ]
}

proptest! {
    #[test]
    fn balanced_workload_returns_heap(ops in prop::collection::vec(arb_op(), 1..256)) {
        let buf: PktBuf<Arena, 32> =
            PktBuf::new(DynamicArena::new(LimitedHeap::new(SystemHeap, 4096)));
        let mut live: Vec<Snip> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc(size) => match buf.alloc(size) {
                    Ok(snip) => live.push(snip),
                    Err(err) => prop_assert!(
                        matches!(err, PktBufError::OutOfMemory | PktBufError::OutOfRecords),
                        "{}", err
                    ),
                },
                Op::Carve(pick, size) if !live.is_empty() => {
                    let pkt = live[pick % live.len()];
                    match buf.add_header(Some(pkt), HeaderData::Front, size, ProtoType::Ipv6) {
                        Ok(header) => live.push(header),
                        Err(err) => prop_assert!(
                            matches!(
                                err,
                                PktBufError::TooLarge(_)
                                    | PktBufError::OutOfRecords
                                    | PktBufError::OutOfMemory
                            ),
                            "{}", err
                        ),
                    }
                }
                Op::Release(pick) if !live.is_empty() => {
                    let victim = live.swap_remove(pick % live.len());
                    prop_assert_eq!(buf.release(victim), Ok(()));
                }
                Op::Carve(..) | Op::Release(_) => {}
            }
            prop_assert_eq!(buf.stats().snips, live.len());
        }

        for snip in live {
            prop_assert_eq!(buf.release(snip), Ok(()));
        }
        prop_assert!(buf.is_empty());
        prop_assert_eq!(buf.stats().arena.in_use, 0);
    }
}
