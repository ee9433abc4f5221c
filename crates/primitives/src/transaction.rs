//! Transaction types and serialization.

use emberd_consensus::constants::{LOCKTIME_THRESHOLD, SEQUENCE_DISABLE_BIT};
use emberd_consensus::Hash256;

use crate::encoding::{varint_size, Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;
use crate::sigops::count_sigops;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn is_final(&self) -> bool {
        self.sequence == u32::MAX
    }

    fn serialized_size(&self) -> usize {
        36 + varint_size(self.script_sig.len() as u64) + self.script_sig.len() + 4
    }
}

impl Encodable for TxIn {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.prevout.consensus_encode(encoder);
        encoder.write_var_bytes(&self.script_sig);
        encoder.write_u32_le(self.sequence);
    }
}

impl Decodable for TxIn {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let prevout = OutPoint::consensus_decode(decoder)?;
        let script_sig = decoder.read_var_bytes()?;
        let sequence = decoder.read_u32_le()?;
        Ok(Self {
            prevout,
            script_sig,
            sequence,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    fn serialized_size(&self) -> usize {
        8 + varint_size(self.script_pubkey.len() as u64) + self.script_pubkey.len()
    }
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    pub version: i32,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn txid(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn consensus_encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(self.serialized_size());
        self.encode_into(&mut encoder);
        encoder.into_inner()
    }

    pub(crate) fn encode_into(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_varint(self.vin.len() as u64);
        for input in &self.vin {
            input.consensus_encode(encoder);
        }
        encoder.write_varint(self.vout.len() as u64);
        for output in &self.vout {
            output.consensus_encode(encoder);
        }
        encoder.write_u32_le(self.lock_time);
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let tx = Self::decode_from(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(tx)
    }

    pub fn decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_i32_le()?;
        let vin_count = decoder.read_varint()?;
        let vin_count = usize::try_from(vin_count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut vin = Vec::with_capacity(vin_count);
        for _ in 0..vin_count {
            vin.push(TxIn::consensus_decode(decoder)?);
        }
        let vout_count = decoder.read_varint()?;
        let vout_count = usize::try_from(vout_count).map_err(|_| DecodeError::SizeTooLarge)?;
        let mut vout = Vec::with_capacity(vout_count);
        for _ in 0..vout_count {
            vout.push(TxOut::consensus_decode(decoder)?);
        }
        let lock_time = decoder.read_u32_le()?;
        Ok(Self {
            version,
            vin,
            vout,
            lock_time,
        })
    }

    /// Canonical (non-witness) serialized length.
    pub fn serialized_size(&self) -> usize {
        4 + varint_size(self.vin.len() as u64)
            + self.vin.iter().map(TxIn::serialized_size).sum::<usize>()
            + varint_size(self.vout.len() as u64)
            + self.vout.iter().map(TxOut::serialized_size).sum::<usize>()
            + 4
    }

    /// Legacy signature-operation count across all member scripts.
    pub fn sigops(&self) -> u32 {
        let inputs: u32 = self
            .vin
            .iter()
            .map(|input| count_sigops(&input.script_sig))
            .sum();
        let outputs: u32 = self
            .vout
            .iter()
            .map(|output| count_sigops(&output.script_pubkey))
            .sum();
        inputs + outputs
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    /// Sum of output values; `None` on overflow.
    pub fn total_output_value(&self) -> Option<i64> {
        self.vout
            .iter()
            .try_fold(0i64, |sum, output| sum.checked_add(output.value))
    }

    /// Final at the given position: locktime expired or every input opted out.
    pub fn is_final(&self, height: i32, time: u32) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let cutoff = if self.lock_time < LOCKTIME_THRESHOLD {
            height as u32
        } else {
            time
        };
        if self.lock_time < cutoff {
            return true;
        }
        self.vin.iter().all(TxIn::is_final)
    }

    /// Any input carries a BIP68-relative lock.
    pub fn has_sequence_locks(&self) -> bool {
        self.version >= 2
            && self
                .vin
                .iter()
                .any(|input| input.sequence & SEQUENCE_DISABLE_BIT == 0)
    }

    /// Any output below the configured dust floor.
    pub fn is_dusty(&self, minimum_output_satoshis: u64) -> bool {
        self.vout
            .iter()
            .any(|output| (output.value as u64) < minimum_output_satoshis)
    }
}
