//! Read-only queries over engine and ledger state.
//!
//! These never mutate state and work against any [`State`], including a
//! [`crate::Layer`] with uncommitted writes.

use commonware_cryptography::ed25519::PublicKey;
use lotto_types::execution::{Key, Value};
use lotto_types::{LotteryConfig, LotteryRegistry, Round, RoundState, TokenAccount, TokenMetadata};

use crate::ledger::{load_token_account, StakeLedger};
use crate::state::State;

/// Error during queries.
#[derive(Debug)]
pub enum QueryError {
    /// The engine has not been initialized.
    NotInitialized,
    /// No round with this id has been opened.
    RoundNotFound(u64),
    /// State access error.
    State(anyhow::Error),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "lottery not initialized"),
            Self::RoundNotFound(id) => write!(f, "round {id} not found"),
            Self::State(err) => write!(f, "state error: {err}"),
        }
    }
}

impl std::error::Error for QueryError {}

impl From<anyhow::Error> for QueryError {
    fn from(err: anyhow::Error) -> Self {
        Self::State(err)
    }
}

/// Summary of a round for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundStatus {
    pub round_id: u64,
    pub state: RoundState,
    pub players: usize,
    pub pool: u64,
    pub opened_at_ms: u64,
    /// Last instant at which entries are still accepted.
    pub expires_at_ms: u64,
    pub carryovers: u32,
    pub winner: Option<PublicKey>,
    pub claimed: bool,
}

impl RoundStatus {
    pub fn from_round(round: &Round, config: &LotteryConfig) -> Self {
        Self {
            round_id: round.id,
            state: round.state,
            players: round.entries.len(),
            pool: round.pool,
            opened_at_ms: round.opened_at_ms,
            expires_at_ms: round.expires_at_ms(config.round_duration_ms),
            carryovers: round.carryovers,
            winner: round.winner.clone(),
            claimed: round.claimed,
        }
    }

    /// Whether an entry at `now_ms` would pass the expiry check.
    pub fn accepting_entries(&self, now_ms: u64) -> bool {
        self.state == RoundState::Open && now_ms <= self.expires_at_ms
    }
}

// -----------------------------------------------------------------------------
// Query Functions
// -----------------------------------------------------------------------------

pub fn query_config<S: State>(state: &S) -> Result<LotteryConfig, QueryError> {
    match state.get(&Key::LotteryConfig)? {
        Some(Value::LotteryConfig(config)) => Ok(config),
        _ => Err(QueryError::NotInitialized),
    }
}

fn query_registry<S: State>(state: &S) -> Result<LotteryRegistry, QueryError> {
    match state.get(&Key::LotteryRegistry)? {
        Some(Value::LotteryRegistry(registry)) => Ok(registry),
        _ => Err(QueryError::NotInitialized),
    }
}

/// Returns the round with `round_id`, open or settled.
pub fn query_round<S: State>(state: &S, round_id: u64) -> Result<Round, QueryError> {
    match state.get(&Key::Round(round_id))? {
        Some(Value::Round(round)) => Ok(round),
        _ => Err(QueryError::RoundNotFound(round_id)),
    }
}

/// Returns the round currently accepting entries.
pub fn query_current_round<S: State>(state: &S) -> Result<Round, QueryError> {
    let registry = query_registry(state)?;
    query_round(state, registry.current_round_id)
}

/// The winner of a round; `None` until it is settled.
pub fn query_winner<S: State>(state: &S, round_id: u64) -> Result<Option<PublicKey>, QueryError> {
    Ok(query_round(state, round_id)?.winner)
}

pub fn query_pool<S: State>(state: &S, round_id: u64) -> Result<u64, QueryError> {
    Ok(query_round(state, round_id)?.pool)
}

pub fn query_round_status<S: State>(state: &S, round_id: u64) -> Result<RoundStatus, QueryError> {
    let config = query_config(state)?;
    let round = query_round(state, round_id)?;
    Ok(RoundStatus::from_round(&round, &config))
}

pub fn query_balance<S: State>(state: &S, owner: &PublicKey) -> Result<u64, QueryError> {
    Ok(state.balance_of(owner)?)
}

pub fn query_allowance<S: State>(
    state: &S,
    owner: &PublicKey,
    spender: &PublicKey,
) -> Result<u64, QueryError> {
    Ok(state.allowance(owner, spender)?)
}

pub fn query_token_metadata<S: State>(state: &S) -> Result<TokenMetadata, QueryError> {
    match state.get(&Key::TokenMetadata)? {
        Some(Value::TokenMetadata(metadata)) => Ok(metadata),
        _ => Err(QueryError::NotInitialized),
    }
}

/// Snapshot of a holder's balance and granted allowances. Unknown holders
/// get an empty account.
pub fn query_token_account<S: State>(
    state: &S,
    owner: &PublicKey,
) -> Result<TokenAccount, QueryError> {
    Ok(load_token_account(state, owner)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{create_account_keypair, create_lottery, fund_and_approve, ROUND_DURATION_MS};
    use crate::state::Memory;

    #[test]
    fn uninitialized_state_reports_not_initialized() {
        let state = Memory::default();
        assert!(matches!(
            query_current_round(&state),
            Err(QueryError::NotInitialized)
        ));
        assert!(matches!(
            query_config(&state),
            Err(QueryError::NotInitialized)
        ));
    }

    #[test]
    fn unknown_round_is_not_found() {
        let mut state = Memory::default();
        create_lottery(&mut state, 0);
        assert!(matches!(
            query_winner(&state, 9),
            Err(QueryError::RoundNotFound(9))
        ));
        assert_eq!(query_winner(&state, 1).unwrap(), None);
        assert_eq!(query_pool(&state, 1).unwrap(), 0);
    }

    #[test]
    fn round_status_reports_admission_window() {
        let mut state = Memory::default();
        create_lottery(&mut state, 1_000);
        let status = query_round_status(&state, 1).unwrap();
        assert_eq!(status.expires_at_ms, 1_000 + ROUND_DURATION_MS);
        assert!(status.accepting_entries(1_000 + ROUND_DURATION_MS));
        assert!(!status.accepting_entries(1_001 + ROUND_DURATION_MS));
        assert_eq!(status.players, 0);
        assert_eq!(status.winner, None);
    }

    #[test]
    fn ledger_queries_read_balances_and_allowances() {
        let mut state = Memory::default();
        let lottery = create_lottery(&mut state, 0);
        let (_, player) = fund_and_approve(&mut state, &lottery, 10, 250);
        assert_eq!(query_balance(&state, &player).unwrap(), 250);
        assert_eq!(
            query_allowance(&state, &player, &lottery.custody).unwrap(),
            250
        );
        let (_, stranger) = create_account_keypair(77);
        assert_eq!(query_balance(&state, &stranger).unwrap(), 0);
    }

    #[test]
    fn token_snapshots_reflect_ledger() {
        let state = Memory::default();
        assert!(matches!(
            query_token_metadata(&state),
            Err(QueryError::NotInitialized)
        ));

        let mut state = Memory::default();
        let lottery = create_lottery(&mut state, 0);
        let (_, player) = fund_and_approve(&mut state, &lottery, 10, 250);
        fund_and_approve(&mut state, &lottery, 11, 50);

        let metadata = query_token_metadata(&state).unwrap();
        assert_eq!(metadata.total_supply, 300);
        let (_, authority) = create_account_keypair(1);
        assert_eq!(metadata.authority, authority);

        let account = query_token_account(&state, &player).unwrap();
        assert_eq!(account.balance, 250);
        assert_eq!(account.allowance(&lottery.custody), 250);
        assert_eq!(account.allowances.len(), 1);

        let (_, stranger) = create_account_keypair(77);
        assert_eq!(
            query_token_account(&state, &stranger).unwrap(),
            TokenAccount::default()
        );
    }
}
