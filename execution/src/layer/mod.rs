use anyhow::{anyhow, Context as _, Result};
use commonware_cryptography::ed25519::PublicKey;
use lotto_types::{
    execution::{Event, Header, Instruction, Key, Output, Transaction, Value},
    LotteryConfig, LotteryError, LotteryRegistry, Round,
};
use std::collections::BTreeMap;
use tracing::debug;

use crate::rng::{EntropySource, SeedEntropy};
use crate::state::{load_account, validate_and_increment_nonce, ApplyError, PrepareError, State, Status};

mod handlers;

/// Pending writes for one block on top of committed state.
///
/// Every write to `pending` is journaled with the entry it replaced. A
/// rejected instruction unwinds the journal back to where the instruction
/// started, so only its nonce bump survives.
pub struct Layer<'a, S: State, E: EntropySource = SeedEntropy> {
    state: &'a S,
    pending: BTreeMap<Key, Status>,
    journal: Vec<(Key, Option<Status>)>,

    header: Header,
    entropy: E,
}

impl<'a, S: State> Layer<'a, S> {
    pub fn new(state: &'a S, header: Header) -> Self {
        let entropy = SeedEntropy::new(header.entropy);
        Self::with_entropy(state, header, entropy)
    }
}

impl<'a, S: State, E: EntropySource> Layer<'a, S, E> {
    pub fn with_entropy(state: &'a S, header: Header, entropy: E) -> Self {
        Self {
            state,
            pending: BTreeMap::new(),
            journal: Vec::new(),

            header,
            entropy,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    fn prepare(&mut self, transaction: &Transaction) -> Result<(), PrepareError> {
        let mut account = load_account(self, &transaction.public).map_err(PrepareError::State)?;
        validate_and_increment_nonce(&mut account, transaction.nonce)?;
        self.insert(
            Key::Account(transaction.public.clone()),
            Value::Account(account),
        )
        .map_err(PrepareError::State)?;

        Ok(())
    }

    fn dispatch(
        &mut self,
        public: &PublicKey,
        instruction: &Instruction,
    ) -> Result<Vec<Event>, ApplyError> {
        match instruction {
            Instruction::Mint { to, amount } => self.handle_mint(public, to, *amount),
            Instruction::Transfer { to, amount } => self.handle_transfer(public, to, *amount),
            Instruction::Approve { spender, amount } => {
                self.handle_approve(public, spender, *amount)
            }

            Instruction::Enter => self.handle_enter(public),
            Instruction::Settle => self.handle_settle(public),
            Instruction::Claim { round_id } => self.handle_claim(public, *round_id),
        }
    }

    fn checkpoint(&self) -> usize {
        self.journal.len()
    }

    /// Restores every pending entry written since `checkpoint`.
    fn rollback(&mut self, checkpoint: usize) {
        for (key, previous) in self.journal.drain(checkpoint..).rev() {
            match previous {
                Some(status) => {
                    self.pending.insert(key, status);
                }
                None => {
                    self.pending.remove(&key);
                }
            }
        }
    }

    fn record(&mut self, key: Key, status: Status) {
        let previous = self.pending.insert(key.clone(), status);
        self.journal.push((key, previous));
    }

    fn apply(&mut self, transaction: &Transaction) -> Result<Vec<Event>> {
        let public = &transaction.public;
        let checkpoint = self.checkpoint();

        match self.dispatch(public, &transaction.instruction) {
            Ok(events) => {
                self.journal.clear();
                Ok(events)
            }
            Err(ApplyError::Rejected(err)) => {
                self.rollback(checkpoint);
                self.journal.clear();
                debug!(
                    public = ?public,
                    code = err.code(),
                    error = %err,
                    "instruction rejected"
                );
                Ok(vec![Event::rejected(public.clone(), &err)])
            }
            Err(ApplyError::State(err)) => Err(err),
        }
    }

    /// Custody funds only move through `enter` and `claim`.
    pub(crate) fn ensure_not_custody(&self, public: &PublicKey) -> Result<(), ApplyError> {
        if let Some(Value::LotteryConfig(config)) = self.get(&Key::LotteryConfig)? {
            if public == &config.custody {
                return Err(LotteryError::Forbidden {
                    reason: "custody funds only move through the engine",
                }
                .into());
            }
        }
        Ok(())
    }

    pub(crate) fn lottery_config(&self) -> Result<LotteryConfig> {
        match self.get(&Key::LotteryConfig)? {
            Some(Value::LotteryConfig(config)) => Ok(config),
            _ => Err(anyhow!("lottery config missing; engine not initialized")),
        }
    }

    pub(crate) fn lottery_registry(&self) -> Result<LotteryRegistry> {
        match self.get(&Key::LotteryRegistry)? {
            Some(Value::LotteryRegistry(registry)) => Ok(registry),
            _ => Err(anyhow!("lottery registry missing; engine not initialized")),
        }
    }

    pub(crate) fn load_round(&self, round_id: u64) -> Result<Option<Round>> {
        Ok(match self.get(&Key::Round(round_id))? {
            Some(Value::Round(round)) => Some(round),
            _ => None,
        })
    }

    pub(crate) fn current_round(&self, registry: &LotteryRegistry) -> Result<Round> {
        self.load_round(registry.current_round_id)?
            .ok_or_else(|| anyhow!("current round {} missing", registry.current_round_id))
    }

    pub(crate) fn store_round(&mut self, round: Round) -> Result<()> {
        self.insert(Key::Round(round.id), Value::Round(round))
    }

    /// Executes transactions in order.
    ///
    /// Transactions with a bad signature or an unexpected nonce are dropped
    /// without output. Returns the outputs and each signer's next nonce.
    pub fn execute(
        &mut self,
        transactions: Vec<Transaction>,
    ) -> Result<(Vec<Output>, BTreeMap<PublicKey, u64>)> {
        let mut processed_nonces = BTreeMap::new();
        let mut outputs = Vec::new();

        for tx in transactions {
            if !tx.verify() {
                debug!(public = ?tx.public, nonce = tx.nonce, "invalid signature; dropping transaction");
                continue;
            }
            match self.prepare(&tx) {
                Ok(()) => {}
                Err(PrepareError::NonceMismatch { expected, got }) => {
                    debug!(
                        public = ?tx.public,
                        expected,
                        got,
                        "nonce mismatch; dropping transaction"
                    );
                    continue;
                }
                Err(PrepareError::State(err)) => {
                    return Err(err).context("state error during prepare");
                }
            }
            processed_nonces.insert(tx.public.clone(), tx.nonce.saturating_add(1));
            let events = self
                .apply(&tx)
                .with_context(|| format!("apply transaction (nonce={})", tx.nonce))?;
            outputs.extend(events.into_iter().map(Output::Event));
            outputs.push(Output::Transaction(tx));
        }

        Ok((outputs, processed_nonces))
    }

    pub fn commit(self) -> Vec<(Key, Status)> {
        self.pending.into_iter().collect()
    }
}

impl<'a, S: State, E: EntropySource> State for Layer<'a, S, E> {
    fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(match self.pending.get(key) {
            Some(Status::Update(value)) => Some(value.clone()),
            Some(Status::Delete) => None,
            None => self.state.get(key)?,
        })
    }

    fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        self.record(key, Status::Update(value));
        Ok(())
    }

    fn delete(&mut self, key: &Key) -> Result<()> {
        self.record(key.clone(), Status::Delete);
        Ok(())
    }
}
