// 32-bit FNV-1a over the little-endian bytes of the key. The result does not
// depend on the table capacity, so a resize rehashes every key consistently.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

pub fn fnv1a(key: i32) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in key.to_le_bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Home slot of `key` in a table with `capacity` slots. `capacity` must be
/// non-zero.
pub fn slot_index(key: i32, capacity: usize) -> usize {
    fnv1a(key) as usize % capacity
}

#[test]
fn test_fnv1a() {
    // Reference values for FNV-1a/32 over the byte strings 00 00 00 00 and
    // 01 00 00 00.
    assert_eq!(fnv1a(0), 0x4b95_f515);
    assert_eq!(fnv1a(1), 0xfb69_b604);
    assert_eq!(fnv1a(-7), fnv1a(-7));
    assert_ne!(fnv1a(1), fnv1a(256));
}

#[test]
fn test_slot_index_in_range() {
    for capacity in [1, 2, 3, 16, 17, 1024] {
        for key in [-100, -1, 0, 1, 42, i32::MAX] {
            assert!(slot_index(key, capacity) < capacity);
        }
    }
}
