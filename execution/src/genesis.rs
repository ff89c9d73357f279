//! Engine initialization.

use anyhow::{bail, Context as _, Result};
use lotto_types::{
    execution::{Event, Key, Value},
    LotteryConfig, LotteryRegistry, Round, TokenMetadata,
};
use tracing::info;

use crate::state::State;

/// Writes the ledger metadata, the engine configuration and an open round 1.
///
/// Fails if the engine is already initialized or the configuration is
/// invalid (the underlying [`lotto_types::ConfigError`] is kept as the source).
pub fn initialize<S: State>(
    state: &mut S,
    token: TokenMetadata,
    config: LotteryConfig,
    opened_at_ms: u64,
) -> Result<Vec<Event>> {
    if state.get(&Key::LotteryConfig)?.is_some() {
        bail!("lottery already initialized");
    }
    config.validate().context("invalid lottery config")?;
    if token.total_supply != 0 {
        bail!(
            "token metadata must start with zero supply (got {})",
            token.total_supply
        );
    }

    let registry = LotteryRegistry::default();
    let round = Round::open(registry.current_round_id, opened_at_ms);

    state
        .insert(Key::TokenMetadata, Value::TokenMetadata(token))
        .context("store token metadata")?;
    state
        .insert(Key::LotteryConfig, Value::LotteryConfig(config.clone()))
        .context("store lottery config")?;
    state
        .insert(Key::Round(round.id), Value::Round(round))
        .context("store first round")?;
    state
        .insert(Key::LotteryRegistry, Value::LotteryRegistry(registry))
        .context("store lottery registry")?;

    info!(
        ticket_price = config.ticket_price,
        round_duration_ms = config.round_duration_ms,
        min_players = config.min_players,
        opened_at_ms,
        "lottery initialized"
    );
    Ok(vec![Event::RoundOpened {
        round_id: registry.current_round_id,
        opened_at_ms,
    }])
}
