use std::env;

/// Capacity used when `PKTBUF_SIZE` is not set: room for four full-MTU IPv6
/// packets (two incoming, two outgoing) plus roughly 1 KiB of headers.
const DEFAULT_PKTBUF_SIZE: usize = 6144;

fn main() {
    println!("cargo:rerun-if-env-changed=PKTBUF_SIZE");
    println!("cargo::rustc-check-cfg=cfg(pktbuf_dynamic)");

    let size = match env::var("PKTBUF_SIZE") {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .unwrap_or_else(|_| panic!("PKTBUF_SIZE must be an unsigned integer (got {value:?})")),
        Err(_) => DEFAULT_PKTBUF_SIZE,
    };

    // Sanity checks (fail fast during build)
    if size > 0 {
        assert_eq!(size % 4, 0, "PKTBUF_SIZE must be a multiple of 4 (got {size})");
        assert!(size >= 32, "PKTBUF_SIZE must be at least 32 bytes (got {size})");
        assert!(size < 1 << 31, "PKTBUF_SIZE must be below 2 GiB (got {size})");
    } else {
        println!("cargo:rustc-cfg=pktbuf_dynamic");
    }

    println!("cargo:rustc-env=PKTBUF_SIZE={size}");
}
