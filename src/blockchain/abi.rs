// src/blockchain/abi.rs
//
// Fixed method/event contract of the counter:
//   getValue() -> uint256, owner() -> address,
//   increment(), decrement(), reset(),
//   event ValueChanged(uint256 newValue).

use ethers_core::abi::{decode, ParamType, Token};
use ethers_core::types::{Address, Bytes, Log, H256, U256};
use ethers_core::utils::keccak256;

use crate::error::SessionError;

pub const VALUE_CHANGED_SIGNATURE: &str = "ValueChanged(uint256)";

fn selector(sig: &str) -> [u8; 4] {
    let mut sel = [0u8; 4];
    sel.copy_from_slice(&keccak256(sig.as_bytes())[0..4]);
    sel
}

/// Methods of the counter contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContractMethod {
    GetValue,
    Owner,
    Increment,
    Decrement,
    Reset,
}

impl ContractMethod {
    pub fn signature(&self) -> &'static str {
        match self {
            ContractMethod::GetValue => "getValue()",
            ContractMethod::Owner => "owner()",
            ContractMethod::Increment => "increment()",
            ContractMethod::Decrement => "decrement()",
            ContractMethod::Reset => "reset()",
        }
    }

    pub fn is_view(&self) -> bool {
        matches!(self, ContractMethod::GetValue | ContractMethod::Owner)
    }

    pub fn selector(&self) -> [u8; 4] {
        selector(self.signature())
    }

    /// Calldata for the method; none of them take arguments.
    pub fn calldata(&self) -> Bytes {
        Bytes::from(self.selector().to_vec())
    }

    /// Recovers the method from calldata, if it is one of ours.
    pub fn from_calldata(data: &[u8]) -> Option<Self> {
        let sel = data.get(..4)?;
        [
            ContractMethod::GetValue,
            ContractMethod::Owner,
            ContractMethod::Increment,
            ContractMethod::Decrement,
            ContractMethod::Reset,
        ]
        .into_iter()
        .find(|m| m.selector() == sel)
    }

    fn output(&self) -> Option<ParamType> {
        match self {
            ContractMethod::GetValue => Some(ParamType::Uint(256)),
            ContractMethod::Owner => Some(ParamType::Address),
            _ => None,
        }
    }
}

/// Decoded return value of a view method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutput {
    Uint(U256),
    Address(Address),
}

impl ReadOutput {
    pub fn into_uint(self) -> Result<U256, SessionError> {
        match self {
            ReadOutput::Uint(n) => Ok(n),
            other => Err(SessionError::DecodeError(format!("expected uint256, got {:?}", other))),
        }
    }

    pub fn into_address(self) -> Result<Address, SessionError> {
        match self {
            ReadOutput::Address(a) => Ok(a),
            other => Err(SessionError::DecodeError(format!("expected address, got {:?}", other))),
        }
    }
}

pub fn decode_output(method: ContractMethod, raw: &[u8]) -> Result<ReadOutput, SessionError> {
    let param = method.output().ok_or_else(|| {
        SessionError::DecodeError(format!("{} has no return value", method.signature()))
    })?;
    let tokens = decode(&[param], raw)
        .map_err(|e| SessionError::DecodeError(format!("{}: {}", method.signature(), e)))?;
    match tokens.into_iter().next() {
        Some(Token::Uint(n)) => Ok(ReadOutput::Uint(n)),
        Some(Token::Address(a)) => Ok(ReadOutput::Address(a)),
        other => Err(SessionError::DecodeError(format!(
            "{}: unexpected token {:?}",
            method.signature(),
            other
        ))),
    }
}

pub fn value_changed_topic() -> H256 {
    H256::from(keccak256(VALUE_CHANGED_SIGNATURE.as_bytes()))
}

/// A decoded `ValueChanged` log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueChanged {
    pub new_value: U256,
    pub block_number: Option<u64>,
    pub tx_hash: Option<H256>,
}

pub fn decode_value_changed(log: &Log) -> Result<ValueChanged, SessionError> {
    if log.topics.first() != Some(&value_changed_topic()) {
        return Err(SessionError::DecodeError(
            "log is not a ValueChanged event".to_string(),
        ));
    }
    let tokens = decode(&[ParamType::Uint(256)], &log.data)
        .map_err(|e| SessionError::DecodeError(format!("ValueChanged payload: {}", e)))?;
    let new_value = match tokens.into_iter().next() {
        Some(Token::Uint(n)) => n,
        other => {
            return Err(SessionError::DecodeError(format!(
                "ValueChanged payload: unexpected token {:?}",
                other
            )))
        }
    };
    Ok(ValueChanged {
        new_value,
        block_number: log.block_number.map(|b| b.as_u64()),
        tx_hash: log.transaction_hash,
    })
}

/// Narrows an on-chain counter to a display integer.
pub fn narrow(value: U256) -> Result<u64, SessionError> {
    if value > U256::from(u64::MAX) {
        return Err(SessionError::DecodeError(format!(
            "counter value {} does not fit in u64",
            value
        )));
    }
    Ok(value.as_u64())
}
