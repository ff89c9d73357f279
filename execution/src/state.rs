use anyhow::Result;
use commonware_cryptography::ed25519::PublicKey;
use lotto_types::execution::{Account, Key, Value};
use lotto_types::{LedgerError, LotteryError};
use std::collections::HashMap;

#[derive(Debug)]
pub enum PrepareError {
    NonceMismatch { expected: u64, got: u64 },
    State(anyhow::Error),
}

/// Failure while applying an instruction.
///
/// `Rejected` is reported to the caller as an event and rolls back the
/// instruction's writes. `State` aborts the whole block.
#[derive(Debug)]
pub enum ApplyError {
    Rejected(LotteryError),
    State(anyhow::Error),
}

impl From<LotteryError> for ApplyError {
    fn from(err: LotteryError) -> Self {
        Self::Rejected(err)
    }
}

impl From<LedgerError> for ApplyError {
    fn from(err: LedgerError) -> Self {
        Self::Rejected(LotteryError::Ledger(err))
    }
}

impl From<anyhow::Error> for ApplyError {
    fn from(err: anyhow::Error) -> Self {
        Self::State(err)
    }
}

/// Key/value storage the engine executes against.
///
/// Every call completes synchronously; implementations must not reorder
/// writes that are applied through [`State::apply`].
pub trait State {
    fn get(&self, key: &Key) -> Result<Option<Value>>;
    fn insert(&mut self, key: Key, value: Value) -> Result<()>;
    fn delete(&mut self, key: &Key) -> Result<()>;

    fn apply(&mut self, changes: Vec<(Key, Status)>) -> Result<()> {
        for (key, status) in changes {
            match status {
                Status::Update(value) => self.insert(key, value)?,
                Status::Delete => self.delete(&key)?,
            }
        }
        Ok(())
    }
}

/// In-memory state. Each instance is independent.
#[derive(Clone, Debug, Default)]
pub struct Memory {
    state: HashMap<Key, Value>,
}

impl Memory {
    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Iterates over all stored entries in key order.
    pub fn entries(&self) -> Vec<(Key, Value)> {
        let mut entries: Vec<_> = self
            .state
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl State for Memory {
    fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(self.state.get(key).cloned())
    }

    fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        self.state.insert(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        self.state.remove(key);
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Status {
    Update(Value),
    Delete,
}

pub fn nonce<S: State>(state: &S, public: &PublicKey) -> Result<u64> {
    Ok(load_account(state, public)?.nonce)
}

pub(crate) fn load_account<S: State>(state: &S, public: &PublicKey) -> Result<Account> {
    Ok(match state.get(&Key::Account(public.clone()))? {
        Some(Value::Account(account)) => account,
        _ => Account::default(),
    })
}

pub(crate) fn validate_and_increment_nonce(
    account: &mut Account,
    provided_nonce: u64,
) -> Result<(), PrepareError> {
    if account.nonce != provided_nonce {
        return Err(PrepareError::NonceMismatch {
            expected: account.nonce,
            got: provided_nonce,
        });
    }
    account.nonce += 1;
    Ok(())
}
