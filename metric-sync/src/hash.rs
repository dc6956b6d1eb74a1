/// Compute an FNV-1a hash over an iterator of byte slices.
///
/// Used to fingerprint traversal plans so ranks can check structural
/// agreement by exchanging 8 bytes instead of whole plans.
pub(crate) fn fnv1a<I, S>(parts: I) -> u64
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut h: u64 = 0xcbf29ce484222325; // FNV-1a offset basis
    for part in parts {
        for &b in part.as_ref() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
    }
    h
}
