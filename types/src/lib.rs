//! Common types for the lotto engine.
//!
//! Everything that crosses a boundary lives here: stored values and their keys,
//! signed instructions, emitted events, and the typed errors behind rejections.

pub mod codec;
pub mod execution;
pub mod lottery;
pub mod token;

pub use execution::{
    genesis_block, genesis_digest, winner_index, Account, Block, Event, Header, Instruction,
    Key, Output, Transaction, Value, NAMESPACE,
};
pub use lottery::{
    ConfigError, Entry, LotteryConfig, LotteryError, LotteryRegistry, Round, RoundState,
    MAX_ROUND_ENTRIES,
};
pub use token::{LedgerError, TokenAccount, TokenMetadata};
