const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a over `bytes`.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV32_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV32_PRIME);
    }
    hash
}

/// Maps a shard key to a partition index in `[0, partition_count)`.
///
/// Stable for a fixed partition count. Returns `0` when `partition_count` is
/// zero; a constructed router always has at least one partition.
pub fn partition_for_key(key: &str, partition_count: usize) -> usize {
    if partition_count == 0 {
        return 0;
    }
    (fnv1a_32(key.as_bytes()) as u64 % partition_count as u64) as usize
}
