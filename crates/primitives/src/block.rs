//! Block header and block types.

use emberd_consensus::Hash256;

use crate::encoding::{varint_size, DecodeError, Decoder, Encoder};
use crate::hash::{pow_hash, sha256d};
use crate::transaction::Transaction;

/// Serialized header length (consensus).
pub const HEADER_SIZE: usize = 80;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(HEADER_SIZE);
        encoder.write_i32_le(self.version);
        encoder.write_hash_le(&self.prev_block);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);
        encoder.into_inner()
    }

    /// Identity hash: double-SHA256 of the 80-byte serialization.
    pub fn hash(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    /// Digest graded against the compact target; scrypt on scrypt chains.
    pub fn pow_hash(&self, scrypt: bool) -> Hash256 {
        pow_hash(&self.consensus_encode(), scrypt)
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = Self::consensus_decode_from(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(header)
    }

    pub fn consensus_decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let prev_block = decoder.read_hash_le()?;
        let merkle_root = decoder.read_hash_le()?;
        let time = decoder.read_u32_le()?;
        let bits = decoder.read_u32_le()?;
        let nonce = decoder.read_u32_le()?;
        Ok(Self {
            version,
            prev_block,
            merkle_root,
            time,
            bits,
            nonce,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(self.serialized_size());
        encoder.write_bytes(&self.header.consensus_encode());
        encoder.write_varint(self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode_into(&mut encoder);
        }
        encoder.into_inner()
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = BlockHeader::consensus_decode_from(&mut decoder)?;
        let count = decoder.read_varint()?;
        let count = usize::try_from(count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            transactions.push(Transaction::decode_from(&mut decoder)?);
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            header,
            transactions,
        })
    }

    pub fn serialized_size(&self) -> usize {
        HEADER_SIZE
            + varint_size(self.transactions.len() as u64)
            + self
                .transactions
                .iter()
                .map(Transaction::serialized_size)
                .sum::<usize>()
    }

    /// Hashes of every member transaction, in block order.
    pub fn txids(&self) -> Vec<Hash256> {
        self.transactions.iter().map(Transaction::txid).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outpoint::OutPoint;
    use crate::transaction::{TxIn, TxOut};

    fn sample_header() -> BlockHeader {
        BlockHeader {
            version: 2,
            prev_block: [0x11; 32],
            merkle_root: [0x22; 32],
            time: 1_400_000_000,
            bits: 0x1d00_ffff,
            nonce: 0xdead_beef,
        }
    }

    #[test]
    fn header_is_eighty_bytes() {
        assert_eq!(sample_header().consensus_encode().len(), HEADER_SIZE);
    }

    #[test]
    fn header_roundtrip() {
        let header = sample_header();
        let decoded =
            BlockHeader::consensus_decode(&header.consensus_encode()).expect("decode header");
        assert_eq!(decoded, header);
        assert_eq!(decoded.hash(), header.hash());
    }

    #[test]
    fn block_roundtrip_and_size() {
        let block = Block {
            header: sample_header(),
            transactions: vec![Transaction {
                version: 1,
                vin: vec![TxIn {
                    prevout: OutPoint::null(),
                    script_sig: vec![0x01, 0x02],
                    sequence: u32::MAX,
                }],
                vout: vec![TxOut {
                    value: 50,
                    script_pubkey: vec![0x51],
                }],
                lock_time: 0,
            }],
        };
        let bytes = block.consensus_encode();
        assert_eq!(bytes.len(), block.serialized_size());
        let decoded = Block::consensus_decode(&bytes).expect("decode block");
        assert_eq!(decoded.hash(), block.hash());
        assert_eq!(decoded.transactions.len(), 1);
    }
}
