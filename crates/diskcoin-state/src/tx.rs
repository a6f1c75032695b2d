//! Minimal transaction model consumed by the stake ledger.
//!
//! Only the fields the ledger reads are modelled: outpoints, output values
//! and output scripts. Scripts are opaque bytes.

use crate::{StateError, StateResult};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use std::fmt;

/// Transaction identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Txid(pub [u8; 32]);

impl Txid {
    /// All-zero id, used by coinbase inputs.
    pub const ZERO: Txid = Txid([0u8; 32]);
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({})", hex::encode(&self.0[..8]))
    }
}

/// Reference to an output of an earlier transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: Txid,
    pub vout: u32,
}

impl OutPoint {
    /// Outpoint of a coinbase input.
    pub const NULL: OutPoint = OutPoint {
        txid: Txid::ZERO,
        vout: u32::MAX,
    };

    /// Check if this is the coinbase outpoint.
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

/// Transaction input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Vec<u8>,
}

/// Transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    /// Amount in base units.
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

/// A transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// Check if this is a coinbase: exactly one input spending the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Blake2b-256 of the serialized transaction.
    pub fn txid(&self) -> Txid {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.to_bytes());
        let mut id = [0u8; 32];
        id.copy_from_slice(&hasher.finalize());
        Txid(id)
    }

    /// Serialize: little-endian integers, u32 counts and lengths.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            out.extend_from_slice(&input.prevout.txid.0);
            out.extend_from_slice(&input.prevout.vout.to_le_bytes());
            write_bytes(&mut out, &input.script_sig);
        }
        out.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_bytes(&mut out, &output.script_pubkey);
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    /// Parse a transaction from the front of `reader`.
    pub(crate) fn read(reader: &mut Reader<'_>) -> StateResult<Self> {
        let version = i32::from_le_bytes(reader.array()?);
        let input_count = reader.u32()?;
        let mut inputs = Vec::new();
        for _ in 0..input_count {
            let txid = Txid(reader.array()?);
            let vout = reader.u32()?;
            let script_sig = reader.bytes()?;
            inputs.push(TxIn {
                prevout: OutPoint { txid, vout },
                script_sig,
            });
        }
        let output_count = reader.u32()?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            let value = i64::from_le_bytes(reader.array()?);
            let script_pubkey = reader.bytes()?;
            outputs.push(TxOut {
                value,
                script_pubkey,
            });
        }
        let lock_time = reader.u32()?;
        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }

    /// Parse a single transaction.
    pub fn from_bytes(data: &[u8]) -> StateResult<Self> {
        let mut reader = Reader::new(data);
        let tx = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(tx)
    }
}

/// Serialize a block's transaction list.
pub fn encode_transactions(txs: &[Transaction]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(txs.len() as u32).to_le_bytes());
    for tx in txs {
        out.extend_from_slice(&tx.to_bytes());
    }
    out
}

/// Parse a block's transaction list.
pub fn decode_transactions(data: &[u8]) -> StateResult<Vec<Transaction>> {
    let mut reader = Reader::new(data);
    let count = reader.u32()?;
    let mut txs = Vec::new();
    for _ in 0..count {
        txs.push(Transaction::read(&mut reader)?);
    }
    reader.finish()?;
    Ok(txs)
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

/// Cursor over a byte slice.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> StateResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                StateError::Serialization(format!(
                    "Unexpected end of data at offset {} (need {} bytes)",
                    self.pos, len
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> StateResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> StateResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn bytes(&mut self) -> StateResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn finish(&self) -> StateResult<()> {
        if self.pos != self.data.len() {
            return Err(StateError::Serialization(format!(
                "{} trailing bytes",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}
