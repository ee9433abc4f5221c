use emberd_consensus::Hash256;
use scrypt::{scrypt, Params};
use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

/// Proof-of-work digest of a serialized header.
///
/// The identity hash is always double-SHA256; chains configured with
/// `scrypt_proof_of_work` grade the work by scrypt(1024,1,1) instead.
pub fn pow_hash(data: &[u8], use_scrypt: bool) -> Hash256 {
    if use_scrypt {
        scrypt_1024(data)
    } else {
        sha256d(data)
    }
}

fn scrypt_1024(data: &[u8]) -> Hash256 {
    // log2(1024) = 10, r = 1, p = 1, dkLen = 32, salt = input.
    let params = Params::new(10, 1, 1, 32).expect("static scrypt params");
    let mut out = [0u8; 32];
    scrypt(data, data, &params, &mut out).expect("output length is fixed");
    out
}
