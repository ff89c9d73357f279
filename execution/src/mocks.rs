//! Helpers for tests and local drivers.

use crate::genesis::initialize;
use crate::ledger::StakeLedger;
use crate::state::{Memory, State};
use crate::state_transition::{committed_height, execute_state_transition};
use commonware_cryptography::{
    ed25519::{PrivateKey, PublicKey},
    sha256::Sha256,
    Hasher, Signer,
};
use lotto_types::execution::{Block, Event, Header, Output, Transaction};
use lotto_types::{LotteryConfig, TokenMetadata};

pub const TICKET_PRICE: u64 = 100;
pub const ROUND_DURATION_MS: u64 = 24 * 60 * 60 * 1_000;

/// Creates an account keypair for Ed25519 signatures used by users
pub fn create_account_keypair(seed: u64) -> (PrivateKey, PublicKey) {
    let private = PrivateKey::from_seed(seed);
    let public = private.public_key();
    (private, public)
}

/// Creates a block header with entropy derived from the height.
pub fn create_header(height: u64, timestamp_ms: u64) -> Header {
    Header {
        height,
        timestamp_ms,
        entropy: Sha256::hash(&height.to_be_bytes()),
    }
}

/// Keys and configuration of an initialized engine.
pub struct LotteryFixture {
    pub authority: PrivateKey,
    pub operator: PrivateKey,
    pub custody: PublicKey,
    pub config: LotteryConfig,
}

/// Initializes the ledger and engine with the default ticket price and duration.
///
/// Seeds 1-3 are reserved for the token authority, operator and custody.
pub fn create_lottery(state: &mut Memory, opened_at_ms: u64) -> LotteryFixture {
    let (authority, authority_public) = create_account_keypair(1);
    let (operator, operator_public) = create_account_keypair(2);
    let (_, custody) = create_account_keypair(3);

    let config = LotteryConfig::new(
        operator_public,
        custody.clone(),
        TICKET_PRICE,
        ROUND_DURATION_MS,
    );
    initialize(
        state,
        TokenMetadata::new("Stake", "STK", authority_public),
        config.clone(),
        opened_at_ms,
    )
    .expect("failed to initialize lottery");

    LotteryFixture {
        authority,
        operator,
        custody,
        config,
    }
}

/// Mints `amount` to the account for `seed` and approves custody to spend it.
pub fn fund_and_approve(
    state: &mut Memory,
    lottery: &LotteryFixture,
    seed: u64,
    amount: u64,
) -> (PrivateKey, PublicKey) {
    let (private, public) = create_account_keypair(seed);
    state
        .mint(&lottery.authority.public_key(), &public, amount)
        .expect("failed to mint");
    state
        .approve(&public, &lottery.custody, amount)
        .expect("failed to approve");
    (private, public)
}

/// Executes `transactions` as the next block and returns its outputs.
pub fn execute_block(
    state: &mut Memory,
    timestamp_ms: u64,
    transactions: Vec<Transaction>,
) -> Vec<Output> {
    let height = committed_height(state).expect("failed to read height") + 1;
    let block = Block::new(
        Sha256::hash(&height.to_be_bytes()),
        height,
        timestamp_ms,
        transactions,
    );
    execute_state_transition(state, &block)
        .expect("failed to execute block")
        .outputs
}

/// Extracts events from outputs, in order.
pub fn events(outputs: &[Output]) -> Vec<Event> {
    outputs
        .iter()
        .filter_map(|output| match output {
            Output::Event(event) => Some(event.clone()),
            _ => None,
        })
        .collect()
}

/// Current nonce for `public`.
pub fn next_nonce<S: State>(state: &S, public: &PublicKey) -> u64 {
    crate::state::nonce(state, public).expect("failed to read nonce")
}
