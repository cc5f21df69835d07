use std::sync::OnceLock;

static LITTLE_ENDIAN: OnceLock<bool> = OnceLock::new();

pub fn little_endian() -> bool {
    *LITTLE_ENDIAN.get_or_init(|| 1u16.to_ne_bytes()[0] == 1)
}

pub fn big_endian() -> bool { !little_endian() }

/// Position of network-order byte `i` (0 = most significant) inside a native `u32` layout.
pub fn network_index(i: usize) -> usize { if big_endian() { i } else { 3 - i } }
