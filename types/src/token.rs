//! Stake token types and canonical encodings.
//!
//! Defines the fungible asset staked into lottery rounds: ledger metadata,
//! per-holder accounts with spender allowances, and the ledger error taxonomy.

use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, FixedSize, Read, ReadExt, Write};
use commonware_cryptography::ed25519::PublicKey;
use commonware_utils::{from_hex, hex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

use crate::codec::{read_string, string_encode_size, write_string};

const MAX_TOKEN_NAME_LENGTH: usize = 32;
const MAX_TOKEN_SYMBOL_LENGTH: usize = 8;
const MAX_ALLOWANCES: usize = 1_024;

/// Failures raised by the stake ledger. Never retried by the engine.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient balance (needed={needed}, available={available})")]
    InsufficientBalance { needed: u64, available: u64 },
    #[error("insufficient allowance (needed={needed}, available={available})")]
    InsufficientAllowance { needed: u64, available: u64 },
    #[error("only the token authority may mint")]
    NotMintAuthority,
    #[error("too many allowances (max={max})")]
    TooManyAllowances { max: usize },
    #[error("amount overflow")]
    Overflow,
}

pub const ERROR_INSUFFICIENT_BALANCE: u8 = 10;
pub const ERROR_INSUFFICIENT_ALLOWANCE: u8 = 11;
pub const ERROR_NOT_MINT_AUTHORITY: u8 = 12;
pub const ERROR_TOO_MANY_ALLOWANCES: u8 = 13;
pub const ERROR_OVERFLOW: u8 = 14;

impl LedgerError {
    pub fn code(&self) -> u8 {
        match self {
            Self::InsufficientBalance { .. } => ERROR_INSUFFICIENT_BALANCE,
            Self::InsufficientAllowance { .. } => ERROR_INSUFFICIENT_ALLOWANCE,
            Self::NotMintAuthority => ERROR_NOT_MINT_AUTHORITY,
            Self::TooManyAllowances { .. } => ERROR_TOO_MANY_ALLOWANCES,
            Self::Overflow => ERROR_OVERFLOW,
        }
    }
}

/// Ledger-wide metadata. `authority` is the only key allowed to mint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: u64,
    #[serde(with = "serde_public_key_hex")]
    pub authority: PublicKey,
}

impl TokenMetadata {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, authority: PublicKey) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            decimals: 18,
            total_supply: 0,
            authority,
        }
    }

    pub fn record_mint(&mut self, minter: &PublicKey, amount: u64) -> Result<(), LedgerError> {
        if minter != &self.authority {
            return Err(LedgerError::NotMintAuthority);
        }
        self.total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        Ok(())
    }
}

fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    from_hex(s).ok_or_else(|| "invalid hex string".to_string())
}

mod serde_public_key_hex {
    use super::hex_decode;
    use commonware_codec::ReadExt;
    use commonware_cryptography::ed25519::PublicKey;
    use commonware_utils::hex;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(public_key: &PublicKey, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex(public_key.as_ref()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<PublicKey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex_decode(&s).map_err(serde::de::Error::custom)?;
        let mut reader = bytes.as_slice();
        PublicKey::read(&mut reader).map_err(|_| serde::de::Error::custom("invalid public key"))
    }
}

mod serde_allowances {
    use super::hex_decode;
    use commonware_codec::ReadExt;
    use commonware_cryptography::ed25519::PublicKey;
    use commonware_utils::hex;
    use serde::{Deserialize, Deserializer, Serialize as _, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S>(
        allowances: &BTreeMap<PublicKey, u64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let allowances_serializable: Vec<(String, u64)> = allowances
            .iter()
            .map(|(pk, amt)| (hex(pk.as_ref()), *amt))
            .collect();
        allowances_serializable.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<PublicKey, u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let allowances_raw = Vec::<(String, u64)>::deserialize(deserializer)?;
        let mut allowances = BTreeMap::new();
        for (s, amt) in allowances_raw {
            let bytes = hex_decode(&s).map_err(serde::de::Error::custom)?;
            let mut reader = bytes.as_slice();
            let pk = PublicKey::read(&mut reader)
                .map_err(|_| serde::de::Error::custom("invalid public key"))?;
            allowances.insert(pk, amt);
        }
        Ok(allowances)
    }
}

/// A holder's balance and the allowances it has granted to spenders.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenAccount {
    pub balance: u64,
    // spender -> remaining amount
    #[serde(with = "serde_allowances")]
    pub allowances: BTreeMap<PublicKey, u64>,
}

impl TokenAccount {
    pub fn allowance(&self, spender: &PublicKey) -> u64 {
        self.allowances.get(spender).copied().unwrap_or(0)
    }

    /// Setting a zero allowance removes the entry so the encoding stays canonical.
    pub fn set_allowance(&mut self, spender: PublicKey, amount: u64) -> Result<(), LedgerError> {
        if amount == 0 {
            self.allowances.remove(&spender);
            return Ok(());
        }
        if !self.allowances.contains_key(&spender) && self.allowances.len() >= MAX_ALLOWANCES {
            return Err(LedgerError::TooManyAllowances {
                max: MAX_ALLOWANCES,
            });
        }
        self.allowances.insert(spender, amount);
        Ok(())
    }

    pub fn spend_allowance(&mut self, spender: &PublicKey, amount: u64) -> Result<(), LedgerError> {
        let available = self.allowance(spender);
        if available < amount {
            return Err(LedgerError::InsufficientAllowance {
                needed: amount,
                available,
            });
        }
        self.set_allowance(spender.clone(), available - amount)
    }

    pub fn debit(&mut self, amount: u64) -> Result<(), LedgerError> {
        if self.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                needed: amount,
                available: self.balance,
            });
        }
        self.balance -= amount;
        Ok(())
    }

    pub fn credit(&mut self, amount: u64) -> Result<(), LedgerError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        Ok(())
    }
}

// Binary Serialization Implementation

impl Write for TokenMetadata {
    fn write(&self, writer: &mut impl BufMut) {
        write_string(&self.name, writer);
        write_string(&self.symbol, writer);
        self.decimals.write(writer);
        self.total_supply.write(writer);
        self.authority.write(writer);
    }
}

impl Read for TokenMetadata {
    type Cfg = ();
    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, commonware_codec::Error> {
        let name = read_string(reader, MAX_TOKEN_NAME_LENGTH)?;
        let symbol = read_string(reader, MAX_TOKEN_SYMBOL_LENGTH)?;
        let decimals = u8::read(reader)?;
        let total_supply = u64::read(reader)?;
        let authority = PublicKey::read(reader)?;

        Ok(Self {
            name,
            symbol,
            decimals,
            total_supply,
            authority,
        })
    }
}

impl EncodeSize for TokenMetadata {
    fn encode_size(&self) -> usize {
        string_encode_size(&self.name)
            + string_encode_size(&self.symbol)
            + u8::SIZE
            + u64::SIZE
            + PublicKey::SIZE
    }
}

impl Write for TokenAccount {
    fn write(&self, writer: &mut impl BufMut) {
        self.balance.write(writer);
        (self.allowances.len() as u32).write(writer);
        for (spender, amount) in &self.allowances {
            spender.write(writer);
            amount.write(writer);
        }
    }
}

impl Read for TokenAccount {
    type Cfg = ();
    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, commonware_codec::Error> {
        let balance = u64::read(reader)?;
        let allowance_count = u32::read(reader)? as usize;
        if allowance_count > MAX_ALLOWANCES {
            return Err(commonware_codec::Error::Invalid(
                "TokenAccount",
                "too many allowances",
            ));
        }
        let mut allowances = BTreeMap::new();
        for _ in 0..allowance_count {
            let spender = PublicKey::read(reader)?;
            let amount = u64::read(reader)?;
            allowances.insert(spender, amount);
        }
        Ok(Self {
            balance,
            allowances,
        })
    }
}

impl EncodeSize for TokenAccount {
    fn encode_size(&self) -> usize {
        u64::SIZE + u32::SIZE + self.allowances.len() * (PublicKey::SIZE + u64::SIZE)
    }
}

/// Hex form of a key, as used in JSON views.
pub fn key_hex(public: &PublicKey) -> String {
    hex(public.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use commonware_codec::DecodeExt as _;
    use commonware_cryptography::{ed25519::PrivateKey, Signer};
    use serde_json::json;

    #[test]
    fn token_account_json_serializes_allowances_canonically() {
        let pk1 = PrivateKey::from_seed(1).public_key();
        let pk2 = PrivateKey::from_seed(2).public_key();

        let raw = json!({
            "balance": 123,
            "allowances": [
                (key_hex(&pk2), 2),
                (key_hex(&pk1), 1),
                (key_hex(&pk1), 9)
            ]
        });

        let decoded: TokenAccount = serde_json::from_value(raw).expect("deserialize TokenAccount");
        assert_eq!(decoded.allowances.len(), 2);
        assert_eq!(decoded.allowance(&pk1), 9);
        assert_eq!(decoded.allowance(&pk2), 2);

        let serialized = serde_json::to_value(&decoded).expect("serialize TokenAccount");
        let allowances = serialized
            .get("allowances")
            .and_then(|v| v.as_array())
            .expect("allowances array");
        assert_eq!(allowances.len(), 2);

        let k0 = allowances[0][0].as_str().unwrap();
        let k1 = allowances[1][0].as_str().unwrap();
        assert!(k0 <= k1, "allowances should be sorted by key");
    }

    #[test]
    fn token_account_binary_encoding_is_canonical_over_allowance_order() {
        let pk1 = PrivateKey::from_seed(1).public_key();
        let pk2 = PrivateKey::from_seed(2).public_key();

        let mut a = TokenAccount {
            balance: 1,
            ..Default::default()
        };
        a.set_allowance(pk2.clone(), 2).unwrap();
        a.set_allowance(pk1.clone(), 1).unwrap();

        let mut b = TokenAccount {
            balance: 1,
            ..Default::default()
        };
        b.set_allowance(pk1.clone(), 1).unwrap();
        b.set_allowance(pk2.clone(), 2).unwrap();

        let mut buf_a = BytesMut::new();
        a.write(&mut buf_a);
        let mut buf_b = BytesMut::new();
        b.write(&mut buf_b);
        assert_eq!(buf_a.as_ref(), buf_b.as_ref());
        assert_eq!(buf_a.len(), a.encode_size());

        let decoded = TokenAccount::decode(buf_a.as_ref()).expect("decode TokenAccount");
        assert_eq!(decoded.allowance(&pk1), 1);
        assert_eq!(decoded.allowance(&pk2), 2);
    }

    #[test]
    fn spending_allowance_to_zero_drops_the_entry() {
        let spender = PrivateKey::from_seed(3).public_key();
        let mut account = TokenAccount::default();
        account.set_allowance(spender.clone(), 100).unwrap();

        let err = account.spend_allowance(&spender, 101).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientAllowance {
                needed: 101,
                available: 100
            }
        );

        account.spend_allowance(&spender, 100).unwrap();
        assert_eq!(account.allowance(&spender), 0);
        assert!(account.allowances.is_empty());
    }

    #[test]
    fn debit_and_credit_are_checked() {
        let mut account = TokenAccount {
            balance: 50,
            ..Default::default()
        };
        assert_eq!(
            account.debit(51),
            Err(LedgerError::InsufficientBalance {
                needed: 51,
                available: 50
            })
        );
        assert_eq!(account.balance, 50);

        account.debit(50).unwrap();
        assert_eq!(account.balance, 0);

        account.credit(u64::MAX).unwrap();
        assert_eq!(account.credit(1), Err(LedgerError::Overflow));
        assert_eq!(account.balance, u64::MAX);
    }

    #[test]
    fn only_the_authority_mints() {
        let authority = PrivateKey::from_seed(1).public_key();
        let other = PrivateKey::from_seed(2).public_key();
        let mut metadata = TokenMetadata::new("Stake", "STK", authority.clone());

        assert_eq!(
            metadata.record_mint(&other, 10),
            Err(LedgerError::NotMintAuthority)
        );
        metadata.record_mint(&authority, 10).unwrap();
        assert_eq!(metadata.total_supply, 10);

        let json = serde_json::to_string(&metadata).unwrap();
        let decoded: TokenMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, metadata);

        let mut buf = BytesMut::new();
        metadata.write(&mut buf);
        assert_eq!(TokenMetadata::decode(buf.as_ref()).unwrap(), metadata);
    }
}
