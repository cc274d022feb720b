//! Jenkins lookup3 `hashlittle`, the checksum HDF5 stores on every
//! version-2 metadata structure (superblock, object headers, array index
//! blocks).

use byteorder::{ByteOrder, LittleEndian};

/// Checksum `data` the way `H5_checksum_lookup3` does with a zero seed.
pub fn lookup3(data: &[u8]) -> u32 {
    let seed = 0xdead_beef_u32.wrapping_add(data.len() as u32);
    let (mut a, mut b, mut c) = (seed, seed, seed);

    if data.is_empty() {
        return c;
    }

    // Every block but the last goes through `mix`; the last one (1..=12
    // bytes) is zero padded and goes through `final_mix`.
    let last_start = (data.len() - 1) / 12 * 12;
    for block in data[..last_start].chunks_exact(12) {
        a = a.wrapping_add(LittleEndian::read_u32(&block[0..4]));
        b = b.wrapping_add(LittleEndian::read_u32(&block[4..8]));
        c = c.wrapping_add(LittleEndian::read_u32(&block[8..12]));
        mix(&mut a, &mut b, &mut c);
    }

    let mut tail = [0u8; 12];
    tail[..data.len() - last_start].copy_from_slice(&data[last_start..]);
    a = a.wrapping_add(LittleEndian::read_u32(&tail[0..4]));
    b = b.wrapping_add(LittleEndian::read_u32(&tail[4..8]));
    c = c.wrapping_add(LittleEndian::read_u32(&tail[8..12]));
    final_mix(&mut a, &mut b, &mut c);
    c
}

#[inline]
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    for (rot_a, rot_b, rot_c) in [(4, 6, 8), (16, 19, 4)] {
        *a = a.wrapping_sub(*c) ^ c.rotate_left(rot_a);
        *c = c.wrapping_add(*b);
        *b = b.wrapping_sub(*a) ^ a.rotate_left(rot_b);
        *a = a.wrapping_add(*c);
        *c = c.wrapping_sub(*b) ^ b.rotate_left(rot_c);
        *b = b.wrapping_add(*a);
    }
}

#[inline]
fn final_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c = (*c ^ *b).wrapping_sub(b.rotate_left(14));
    *a = (*a ^ *c).wrapping_sub(c.rotate_left(11));
    *b = (*b ^ *a).wrapping_sub(a.rotate_left(25));
    *c = (*c ^ *b).wrapping_sub(b.rotate_left(16));
    *a = (*a ^ *c).wrapping_sub(c.rotate_left(4));
    *b = (*b ^ *a).wrapping_sub(a.rotate_left(14));
    *c = (*c ^ *b).wrapping_sub(b.rotate_left(24));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_seed() {
        assert_eq!(lookup3(b""), 0xdead_beef);
    }

    #[test]
    fn reference_vector() {
        // From the lookup3.c self-test driver.
        assert_eq!(lookup3(b"Four score and seven years ago"), 0x1777_0551);
    }

    #[test]
    fn block_boundaries_differ() {
        let data: Vec<u8> = (0u8..40).collect();
        let hashes: Vec<u32> = (1..=data.len()).map(|n| lookup3(&data[..n])).collect();
        for pair in hashes.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }
}
