//! Apply a block's transactions to state.
//!
//! Blocks must arrive in height order. Re-submitting an already executed
//! height is a no-op, so a driver can safely retry after a crash.

use anyhow::{anyhow, Context as _, Result};
use commonware_cryptography::ed25519::PublicKey;
use lotto_types::execution::{Block, Key, Output, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::{Layer, State};

/// Result of executing a block's state transition
#[derive(Debug)]
pub struct StateTransitionResult {
    pub height: u64,
    /// Events and included transactions, followed by `Output::Commit`.
    pub outputs: Vec<Output>,
    /// Map of public keys to their next expected nonce after processing
    pub processed_nonces: BTreeMap<PublicKey, u64>,
}

/// Height of the last block applied to `state` (0 before the first block).
pub fn committed_height<S: State>(state: &S) -> Result<u64> {
    Ok(
        match state.get(&Key::Commit).context("read commit height")? {
            Some(Value::Commit { height }) => height,
            _ => 0,
        },
    )
}

/// Execute state transition for a block
///
/// Executes every transaction against a [`Layer`] and applies the pending
/// changes to `state` only once the whole block has run. Only processes the
/// block if it's the next expected height.
pub fn execute_state_transition<S: State>(
    state: &mut S,
    block: &Block,
) -> Result<StateTransitionResult> {
    let state_height = committed_height(state)?;
    let height = block.height;

    if height <= state_height {
        debug!(height, state_height, "block already executed; skipping");
        return Ok(StateTransitionResult {
            height: state_height,
            outputs: Vec::new(),
            processed_nonces: BTreeMap::new(),
        });
    }

    let expected_next_height = state_height.saturating_add(1);
    if height != expected_next_height {
        return Err(anyhow!(
            "non-sequential height: state_height={state_height}, expected={expected_next_height}, requested={height}"
        ));
    }

    let mut layer = Layer::new(&*state, block.header());
    let (mut outputs, processed_nonces) = layer
        .execute(block.transactions.clone())
        .with_context(|| format!("execute layer (height={height})"))?;
    let changes = layer.commit();

    state
        .apply(changes)
        .with_context(|| format!("apply state changes (height={height})"))?;
    state
        .insert(Key::Commit, Value::Commit { height })
        .with_context(|| format!("commit state (height={height})"))?;
    outputs.push(Output::Commit { height });

    Ok(StateTransitionResult {
        height,
        outputs,
        processed_nonces,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{create_account_keypair, create_lottery, TICKET_PRICE};
    use crate::state::Memory;
    use commonware_cryptography::{sha256::Sha256, Hasher};
    use lotto_types::execution::{Event, Instruction, Transaction};

    fn block(height: u64, transactions: Vec<Transaction>) -> Block {
        Block::new(
            Sha256::hash(&height.to_be_bytes()),
            height,
            height * 1_000,
            transactions,
        )
    }

    #[test]
    fn executes_blocks_in_order() {
        let mut state = Memory::default();
        let lottery = create_lottery(&mut state, 0);
        let (_, alice) = create_account_keypair(10);

        let mint = Transaction::sign(
            &lottery.authority,
            0,
            Instruction::Mint {
                to: alice.clone(),
                amount: TICKET_PRICE,
            },
        );
        let result = execute_state_transition(&mut state, &block(1, vec![mint])).unwrap();
        assert_eq!(result.height, 1);
        assert_eq!(result.outputs.len(), 3);
        assert!(matches!(
            result.outputs[0],
            Output::Event(Event::Minted { .. })
        ));
        assert_eq!(result.outputs[2], Output::Commit { height: 1 });
        assert_eq!(committed_height(&state).unwrap(), 1);
        assert_eq!(
            crate::query::query_balance(&state, &alice).unwrap(),
            TICKET_PRICE
        );
    }

    #[test]
    fn replayed_height_is_a_noop() {
        let mut state = Memory::default();
        let lottery = create_lottery(&mut state, 0);
        let mint = Transaction::sign(
            &lottery.authority,
            0,
            Instruction::Mint {
                to: create_account_keypair(10).1,
                amount: 1,
            },
        );
        let first = block(1, vec![mint]);
        execute_state_transition(&mut state, &first).unwrap();
        let snapshot = state.entries();

        let result = execute_state_transition(&mut state, &first).unwrap();
        assert!(result.outputs.is_empty());
        assert!(result.processed_nonces.is_empty());
        assert_eq!(state.entries(), snapshot);
    }

    #[test]
    fn height_gap_is_an_error() {
        let mut state = Memory::default();
        create_lottery(&mut state, 0);
        let err = execute_state_transition(&mut state, &block(2, vec![])).unwrap_err();
        assert!(err.to_string().contains("non-sequential height"));
        assert_eq!(committed_height(&state).unwrap(), 0);
    }

    #[test]
    fn failed_block_leaves_state_untouched() {
        // No engine state: Settle hits a storage invariant and aborts the block.
        let mut state = Memory::default();
        let (operator, _) = create_account_keypair(2);
        let settle = Transaction::sign(&operator, 0, Instruction::Settle);
        assert!(execute_state_transition(&mut state, &block(1, vec![settle])).is_err());
        assert!(state.is_empty());
    }
}
