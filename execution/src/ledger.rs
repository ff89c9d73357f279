//! Stake ledger over engine state.
//!
//! The lottery engine only ever moves stake through [`StakeLedger`]. The
//! implementation here stores balances and allowances as `Key::TokenAccount`
//! records next to the engine's own state, so a rejected instruction rolls
//! both back together.

use anyhow::{anyhow, Result};
use commonware_cryptography::ed25519::PublicKey;
use lotto_types::execution::{Key, Value};
use lotto_types::{TokenAccount, TokenMetadata};

use crate::state::{ApplyError, State};

/// Narrow ledger interface consumed by the settlement engine.
pub trait StakeLedger {
    fn balance_of(&self, owner: &PublicKey) -> Result<u64>;
    fn allowance(&self, owner: &PublicKey, spender: &PublicKey) -> Result<u64>;

    /// Moves `amount` from `from` to `to`.
    fn transfer(&mut self, from: &PublicKey, to: &PublicKey, amount: u64)
        -> Result<(), ApplyError>;

    /// Moves `amount` from `owner` to `to`, spending `spender`'s allowance.
    fn transfer_from(
        &mut self,
        owner: &PublicKey,
        spender: &PublicKey,
        to: &PublicKey,
        amount: u64,
    ) -> Result<(), ApplyError>;

    fn approve(
        &mut self,
        owner: &PublicKey,
        spender: &PublicKey,
        amount: u64,
    ) -> Result<(), ApplyError>;

    /// Creates `amount` for `to`, returning the new total supply.
    fn mint(&mut self, minter: &PublicKey, to: &PublicKey, amount: u64)
        -> Result<u64, ApplyError>;
}

pub(crate) fn load_token_account<S: State + ?Sized>(
    state: &S,
    owner: &PublicKey,
) -> Result<TokenAccount> {
    Ok(match state.get(&Key::TokenAccount(owner.clone()))? {
        Some(Value::TokenAccount(account)) => account,
        _ => TokenAccount::default(),
    })
}

pub(crate) fn load_token_metadata<S: State + ?Sized>(state: &S) -> Result<TokenMetadata> {
    match state.get(&Key::TokenMetadata)? {
        Some(Value::TokenMetadata(metadata)) => Ok(metadata),
        _ => Err(anyhow!("token metadata missing; ledger not initialized")),
    }
}

fn store_token_account<S: State + ?Sized>(
    state: &mut S,
    owner: &PublicKey,
    account: TokenAccount,
) -> Result<()> {
    state.insert(
        Key::TokenAccount(owner.clone()),
        Value::TokenAccount(account),
    )
}

impl<S: State> StakeLedger for S {
    fn balance_of(&self, owner: &PublicKey) -> Result<u64> {
        Ok(load_token_account(self, owner)?.balance)
    }

    fn allowance(&self, owner: &PublicKey, spender: &PublicKey) -> Result<u64> {
        Ok(load_token_account(self, owner)?.allowance(spender))
    }

    fn transfer(
        &mut self,
        from: &PublicKey,
        to: &PublicKey,
        amount: u64,
    ) -> Result<(), ApplyError> {
        let mut source = load_token_account(self, from)?;
        source.debit(amount)?;
        store_token_account(self, from, source)?;

        // Reloaded after the debit so a self-transfer nets to zero.
        let mut destination = load_token_account(self, to)?;
        destination.credit(amount)?;
        store_token_account(self, to, destination)?;
        Ok(())
    }

    fn transfer_from(
        &mut self,
        owner: &PublicKey,
        spender: &PublicKey,
        to: &PublicKey,
        amount: u64,
    ) -> Result<(), ApplyError> {
        let mut source = load_token_account(self, owner)?;
        source.spend_allowance(spender, amount)?;
        source.debit(amount)?;
        store_token_account(self, owner, source)?;

        let mut destination = load_token_account(self, to)?;
        destination.credit(amount)?;
        store_token_account(self, to, destination)?;
        Ok(())
    }

    fn approve(
        &mut self,
        owner: &PublicKey,
        spender: &PublicKey,
        amount: u64,
    ) -> Result<(), ApplyError> {
        let mut account = load_token_account(self, owner)?;
        account.set_allowance(spender.clone(), amount)?;
        store_token_account(self, owner, account)?;
        Ok(())
    }

    fn mint(
        &mut self,
        minter: &PublicKey,
        to: &PublicKey,
        amount: u64,
    ) -> Result<u64, ApplyError> {
        let mut metadata = load_token_metadata(self)?;
        metadata.record_mint(minter, amount)?;

        let mut account = load_token_account(self, to)?;
        account.credit(amount)?;
        store_token_account(self, to, account)?;

        let total_supply = metadata.total_supply;
        self.insert(Key::TokenMetadata, Value::TokenMetadata(metadata))?;
        Ok(total_supply)
    }
}
