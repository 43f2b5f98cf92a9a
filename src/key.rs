/// Derives the signed 64-bit advisory lock key for a resource name.
///
/// Uses a djb2 xor variant folded over the utf-16 code units of `name`,
/// so keys match other implementations of this derivation (which fold
/// per code unit, not per byte) against the same database.
///
/// Deterministic: equal names always derive equal keys. Distinct names
/// may collide; with a 64-bit key space this is accepted rather than
/// detected.
pub fn derive_key(name: &str) -> i64 {
    let mut acc: u64 = 5381;
    for unit in name.encode_utf16() {
        acc = acc.wrapping_mul(33) ^ u64::from(unit);
    }
    acc as i64
}
