//! Common sizing helpers shared by Detour structures

/// Returns the next power of 2
#[inline]
pub fn dt_next_pow2(mut v: u32) -> u32 {
    if v == 0 {
        return 0;
    }
    v -= 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v + 1
}

/// Hash bucket count for a node pool holding `max_nodes` nodes
///
/// One bucket per four nodes, rounded up to a power of two. Never zero,
/// since the pool masks hashes with `bucket_count - 1`.
#[inline]
pub fn dt_node_pool_hash_size(max_nodes: usize) -> usize {
    let quarter = u32::try_from(max_nodes / 4)
        .unwrap_or(u32::MAX)
        .min(1 << 31);
    (dt_next_pow2(quarter) as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_pow2() {
        assert_eq!(dt_next_pow2(0), 0);
        assert_eq!(dt_next_pow2(1), 1);
        assert_eq!(dt_next_pow2(2), 2);
        assert_eq!(dt_next_pow2(3), 4);
        assert_eq!(dt_next_pow2(5), 8);
        assert_eq!(dt_next_pow2(17), 32);
    }

    #[test]
    fn test_node_pool_hash_size() {
        assert_eq!(dt_node_pool_hash_size(0), 1);
        assert_eq!(dt_node_pool_hash_size(3), 1);
        assert_eq!(dt_node_pool_hash_size(8), 2);
        assert_eq!(dt_node_pool_hash_size(20), 8);
        assert_eq!(dt_node_pool_hash_size(2048), 512);
    }
}
