//! Merkle root computation over transaction hashes.

use emberd_consensus::Hash256;

use crate::hash::sha256d;

/// Fold a list of txids into the header commitment. The odd-element rule
/// duplicates the last hash, matching the original chain's tree shape.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return [0u8; 32];
    }

    let mut layer: Vec<Hash256> = txids.to_vec();
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len().div_ceil(2));
        for pair in layer.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            let mut concat = [0u8; 64];
            concat[0..32].copy_from_slice(&left);
            concat[32..64].copy_from_slice(&right);
            next.push(sha256d(&concat));
        }
        layer = next;
    }
    layer[0]
}
