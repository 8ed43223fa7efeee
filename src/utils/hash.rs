/// SQLite's WAL checksum, continued from `seed`.
///
/// `data` is consumed as pairs of 32-bit words in the byte order selected
/// by the WAL magic; its length must be a multiple of 8.
pub fn wal_checksum(data: &[u8], big_endian: bool, seed: (u32, u32)) -> (u32, u32) {
    debug_assert!(data.len() % 8 == 0, "WAL checksum input must be 8-byte aligned");
    let (mut s1, mut s2) = seed;
    for chunk in data.chunks_exact(8) {
        let (w0, w1) = if big_endian {
            (
                u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
            )
        } else {
            (
                u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
            )
        };
        s1 = s1.wrapping_add(w0).wrapping_add(s2);
        s2 = s2.wrapping_add(w1).wrapping_add(s1);
    }
    (s1, s2)
}
