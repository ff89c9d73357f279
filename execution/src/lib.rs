//! Lotto execution layer.
//!
//! This crate contains the deterministic transaction execution logic (`Layer`), the
//! stake ledger and the round settlement rules used by drivers such as the simulator.
//!
//! ## Determinism requirements
//! - Do not use wall-clock time inside execution; the block header carries the timestamp.
//! - Do not use non-deterministic randomness; winners are derived from block entropy.
//! - Avoid iteration order of hash-based collections influencing outputs.
//!
//! ## Atomicity
//! Every instruction runs against a checkpoint of the pending writes. A rejected
//! instruction restores the checkpoint, consumes the signer's nonce and emits
//! `Event::Rejected`. A block only reaches storage once every transaction in it
//! has run.
//!
//! The primary entrypoint is [`execute_state_transition`].
//!
//! ## Minimal execution pipeline (example)
//! ```rust,ignore
//! use lotto_execution::{execute_state_transition, initialize, Memory};
//! use lotto_types::{genesis_digest, Block, LotteryConfig, TokenMetadata};
//!
//! # fn example(token: TokenMetadata, config: LotteryConfig) -> anyhow::Result<()> {
//! let mut state = Memory::default();
//! initialize(&mut state, token, config, /* opened_at_ms */ 0)?;
//!
//! // Height must be exactly `committed_height + 1`.
//! let block = Block::new(genesis_digest(), 1, 1_000, vec![]);
//! let result = execute_state_transition(&mut state, &block)?;
//! assert_eq!(result.height, 1);
//! # Ok(())
//! # }
//! ```

pub mod genesis;
pub mod ledger;
pub mod query;
pub mod rng;
pub mod state_transition;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

mod layer;
mod state;


pub use genesis::initialize;
pub use layer::Layer;
pub use ledger::StakeLedger;
pub use query::{
    query_allowance, query_balance, query_config, query_current_round, query_pool,
    query_round, query_round_status, query_token_account, query_token_metadata, query_winner,
    QueryError, RoundStatus,
};
pub use rng::{draw_winner, EntropySource, SeedEntropy};
#[cfg(any(test, feature = "mocks"))]
pub use rng::FixedEntropy;
pub use state::{nonce, ApplyError, Memory, PrepareError, State, Status};
pub use state_transition::{committed_height, execute_state_transition, StateTransitionResult};
