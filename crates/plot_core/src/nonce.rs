//! Proofs are N-byte little-endian counters.

/// Encode `value` as an N-byte little-endian proof. Bytes above 8 stay zero.
pub fn encode(value: u64, proof_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; proof_len];
    let le = value.to_le_bytes();
    let n = proof_len.min(le.len());
    out[..n].copy_from_slice(&le[..n]);
    out
}

/// Numeric value of the low 8 bytes of a proof.
pub fn decode(proof: &[u8]) -> u64 {
    let mut le = [0u8; 8];
    let n = proof.len().min(8);
    le[..n].copy_from_slice(&proof[..n]);
    u64::from_le_bytes(le)
}

/// Successor, wrapping at 2^(8N).
#[inline]
pub fn increment(proof: &mut [u8]) {
    for b in proof.iter_mut() {
        *b = b.wrapping_add(1);
        if *b != 0 { break; }
    }
}

/// Add `by` with carry, wrapping at 2^(8N).
pub fn advance(proof: &mut [u8], by: u64) {
    let mut carry = by as u128;
    for b in proof.iter_mut() {
        if carry == 0 { break; }
        let sum = *b as u128 + (carry & 0xFF);
        *b = sum as u8;
        carry = (carry >> 8) + (sum >> 8);
    }
}

/// Number of distinct proofs N bytes can hold, saturated to u64.
pub fn space(proof_len: usize) -> u64 {
    if proof_len >= 8 { u64::MAX } else { 1u64 << (8 * proof_len) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_carries() {
        let mut p = vec![0xFF, 0xFF, 0x00];
        increment(&mut p);
        assert_eq!(p, vec![0, 0, 1]);
        assert_eq!(decode(&p), 0x1_0000);
    }

    #[test]
    fn advance_matches_repeated_increment() {
        let mut a = encode(250, 6);
        let mut b = a.clone();
        advance(&mut a, 1000);
        for _ in 0..1000 { increment(&mut b); }
        assert_eq!(a, b);
        assert_eq!(decode(&a), 1250);
    }

    #[test]
    fn encode_wide_and_narrow() {
        assert_eq!(encode(0x0102, 2), vec![0x02, 0x01]);
        let wide = encode(7, 12);
        assert_eq!(wide.len(), 12);
        assert_eq!(decode(&wide), 7);
        assert_eq!(space(2), 65536);
        assert_eq!(space(8), u64::MAX);
    }
}
