//! Pledge classification and address encoding.
//!
//! The ledger does not interpret scripts itself; it asks a
//! [`PledgeClassifier`] which transactions move stake and an
//! [`AddressCodec`] which address an output pays to.

use crate::tx::Transaction;
use crate::{StateError, StateResult};
use std::fmt;

/// Longest address accepted by the ledger, in bytes.
pub const MAX_ADDRESS_LEN: usize = 63;

/// `OP_RETURN`.
const OP_RETURN: u8 = 0x6a;

/// Largest direct push opcode.
const OP_PUSHBYTES_75: u8 = 0x4b;

/// Marker prefix of pledge payloads.
pub const DCOP_MAGIC: &[u8; 4] = b"DCOP";

const DCOP_PLEDGE: u8 = 1;
const DCOP_UNPLEDGE: u8 = 2;

/// Validated ledger address: non-empty, at most 63 bytes, no NUL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StakeAddress(String);

impl StakeAddress {
    /// Validate an address string.
    pub fn new(address: impl Into<String>) -> StateResult<Self> {
        let address = address.into();
        if address.is_empty() || address.len() > MAX_ADDRESS_LEN || address.contains('\0') {
            return Err(StateError::InvalidAddress(address));
        }
        Ok(Self(address))
    }

    /// Address text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StakeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stake effect of a transaction.
///
/// `input` indexes the output that carries the pledged amount and `output`
/// the output whose address receives the stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PledgeKind {
    /// No stake effect.
    None,
    /// Locks `outputs[input].value` to the address of `outputs[output]`.
    Pledge { input: usize, output: usize },
    /// Releases the pledge spent by the first input.
    Unpledge { input: usize, output: usize },
}

/// Decides whether a transaction is a pledge or an unpledge.
pub trait PledgeClassifier: Send + Sync {
    /// Classify a transaction.
    fn classify(&self, tx: &Transaction) -> PledgeKind;
}

/// Maps an output script to its address string.
pub trait AddressCodec: Send + Sync {
    /// Address of `script`, or `None` when it has no valid address.
    fn encode(&self, script: &[u8]) -> Option<String>;
}

/// Classifier for `OP_RETURN` outputs carrying a `DCOP` marker.
///
/// Payload layout: `"DCOP" | kind | input | output`, where kind 1 is a
/// pledge and 2 an unpledge. The first marker output wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct DcopClassifier;

impl DcopClassifier {
    /// Build the marker script for a pledge kind. `PledgeKind::None` yields an empty script.
    pub fn marker_script(kind: PledgeKind) -> Vec<u8> {
        let (tag, input, output) = match kind {
            PledgeKind::None => return Vec::new(),
            PledgeKind::Pledge { input, output } => (DCOP_PLEDGE, input, output),
            PledgeKind::Unpledge { input, output } => (DCOP_UNPLEDGE, input, output),
        };
        let mut script = vec![OP_RETURN, 7];
        script.extend_from_slice(DCOP_MAGIC);
        script.extend_from_slice(&[tag, input as u8, output as u8]);
        script
    }

    fn parse(script: &[u8]) -> Option<PledgeKind> {
        let (&op, rest) = script.split_first()?;
        if op != OP_RETURN {
            return None;
        }
        let (&push, rest) = rest.split_first()?;
        if push == 0 || push > OP_PUSHBYTES_75 || rest.len() < push as usize {
            return None;
        }
        let payload = &rest[..push as usize];
        if payload.len() < 7 || &payload[..4] != DCOP_MAGIC {
            return None;
        }

        let input = payload[5] as usize;
        let output = payload[6] as usize;
        match payload[4] {
            DCOP_PLEDGE => Some(PledgeKind::Pledge { input, output }),
            DCOP_UNPLEDGE => Some(PledgeKind::Unpledge { input, output }),
            _ => None,
        }
    }
}

impl PledgeClassifier for DcopClassifier {
    fn classify(&self, tx: &Transaction) -> PledgeKind {
        if tx.is_coinbase() {
            return PledgeKind::None;
        }
        tx.outputs
            .iter()
            .find_map(|out| Self::parse(&out.script_pubkey))
            .unwrap_or(PledgeKind::None)
    }
}

/// Address codec that renders the script as lowercase hex.
///
/// Scripts longer than 31 bytes exceed the address limit and are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexAddressCodec;

impl AddressCodec for HexAddressCodec {
    fn encode(&self, script: &[u8]) -> Option<String> {
        if script.is_empty() || script.len() * 2 > MAX_ADDRESS_LEN {
            return None;
        }
        Some(hex::encode(script))
    }
}

/// Classifier and codec used by a ledger.
pub struct LedgerRules {
    pub classifier: Box<dyn PledgeClassifier>,
    pub codec: Box<dyn AddressCodec>,
}

impl LedgerRules {
    /// Combine a classifier and a codec.
    pub fn new(
        classifier: impl PledgeClassifier + 'static,
        codec: impl AddressCodec + 'static,
    ) -> Self {
        Self {
            classifier: Box::new(classifier),
            codec: Box::new(codec),
        }
    }
}

impl Default for LedgerRules {
    fn default() -> Self {
        Self::new(DcopClassifier, HexAddressCodec)
    }
}

impl fmt::Debug for LedgerRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerRules").finish_non_exhaustive()
    }
}
