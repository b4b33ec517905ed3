//! Bit-reflected CRC32 helpers.
//!
//! Two polynomials are needed: ISO/HDLC (0x04C11DB7) for the A64 CRC32
//! instructions and Castagnoli (0x1EDC6F41) for CRC32C and for the fast
//! dispatch hash. The Castagnoli routines here compute exactly what the
//! x86-64 `crc32` instruction computes (reflected, no pre/post inversion),
//! so host-side table maintenance stays consistent with emitted code.

const fn make_table(poly_reflected: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ poly_reflected } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static ISO_TABLE: [u32; 256] = make_table(0xEDB8_8320);
static CASTAGNOLI_TABLE: [u32; 256] = make_table(0x82F6_3B78);

fn update(table: &[u32; 256], mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        crc = table[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc
}

/// ISO polynomial CRC over the low `length` bytes of `value`.
pub fn compute_crc32_iso(accumulator: u32, value: u64, length: usize) -> u32 {
    update(&ISO_TABLE, accumulator, &value.to_le_bytes()[..length])
}

/// Castagnoli polynomial CRC over the low `length` bytes of `value`.
/// Matches the x86-64 `crc32` instruction applied byte by byte.
pub fn compute_crc32_castagnoli(accumulator: u32, value: u64, length: usize) -> u32 {
    update(&CASTAGNOLI_TABLE, accumulator, &value.to_le_bytes()[..length])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_known_vector() {
        // crc32("123456789") with init !0 and final xor: 0xCBF43926.
        let mut crc = !0u32;
        for &b in b"123456789" {
            crc = update(&ISO_TABLE, crc, &[b]);
        }
        assert_eq!(!crc, 0xCBF4_3926);
    }

    #[test]
    fn castagnoli_known_vector() {
        // crc32c("123456789") = 0xE3069283.
        let mut crc = !0u32;
        for &b in b"123456789" {
            crc = update(&CASTAGNOLI_TABLE, crc, &[b]);
        }
        assert_eq!(!crc, 0xE306_9283);
    }

    #[test]
    fn wide_update_equals_chained_narrow_updates() {
        let a = compute_crc32_iso(0, 0x1122_3344_5566_7788, 4);
        let chained = compute_crc32_iso(compute_crc32_iso(0, 0x7788, 2), 0x5566, 2);
        assert_eq!(a, chained);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn castagnoli_matches_hardware() {
        if !std::is_x86_feature_detected!("sse4.2") {
            return;
        }
        for &(seed, value) in &[(0u32, 0x0123_4567_89AB_CDEFu64), (0xDEAD_BEEF, 42)] {
            let hw = unsafe { std::arch::x86_64::_mm_crc32_u64(seed as u64, value) } as u32;
            assert_eq!(compute_crc32_castagnoli(seed, value, 8), hw);
        }
    }
}
