use super::super::*;
use crate::ledger::StakeLedger;
use crate::rng::draw_winner;
use lotto_types::{Entry, LedgerError, LotteryError, RoundState, MAX_ROUND_ENTRIES};
use tracing::info;

impl<'a, S: State, E: EntropySource> Layer<'a, S, E> {
    // === Lottery Handlers ===

    pub(in crate::layer) fn handle_enter(
        &mut self,
        public: &PublicKey,
    ) -> Result<Vec<Event>, ApplyError> {
        let config = self.lottery_config()?;
        if public == &config.operator {
            return Err(LotteryError::Forbidden {
                reason: "operator may not participate",
            }
            .into());
        }
        if public == &config.custody {
            return Err(LotteryError::Forbidden {
                reason: "custody may not participate",
            }
            .into());
        }

        let mut registry = self.lottery_registry()?;
        let mut round = self.current_round(&registry)?;
        let now_ms = self.header.timestamp_ms;
        if round.is_expired(now_ms, config.round_duration_ms) {
            return Err(LotteryError::Expired {
                round_id: round.id,
                expires_at_ms: round.expires_at_ms(config.round_duration_ms),
                now_ms,
            }
            .into());
        }
        if round.entries.len() >= MAX_ROUND_ENTRIES {
            return Err(LotteryError::RoundFull {
                max: MAX_ROUND_ENTRIES,
            }
            .into());
        }

        // Custody is the approved spender and the recipient.
        self.transfer_from(public, &config.custody, &config.custody, config.ticket_price)?;

        let player_id = registry.allocate_player_id()?;
        round.pool = round
            .pool
            .checked_add(config.ticket_price)
            .ok_or(LedgerError::Overflow)?;
        round.entries.push(Entry {
            player_id,
            player: public.clone(),
            round_id: round.id,
            stake: config.ticket_price,
        });

        let event = Event::PlayerJoined {
            player_id,
            player: public.clone(),
            round_id: round.id,
            pool: round.pool,
        };
        debug!(
            player = ?public,
            player_id,
            round_id = round.id,
            pool = round.pool,
            "player joined"
        );
        self.store_round(round)?;
        self.insert(Key::LotteryRegistry, Value::LotteryRegistry(registry))?;

        Ok(vec![event])
    }

    pub(in crate::layer) fn handle_settle(
        &mut self,
        public: &PublicKey,
    ) -> Result<Vec<Event>, ApplyError> {
        let config = self.lottery_config()?;
        if public != &config.operator {
            return Err(LotteryError::Forbidden {
                reason: "only the operator may settle",
            }
            .into());
        }

        let mut registry = self.lottery_registry()?;
        let mut round = self.current_round(&registry)?;
        let now_ms = self.header.timestamp_ms;
        let players = round.entries.len();

        if players < config.min_players as usize {
            // Quorum not met: keep entries and pool, restart the admission window.
            round.opened_at_ms = now_ms;
            round.carryovers = round.carryovers.saturating_add(1);
            info!(
                round_id = round.id,
                players,
                min_players = config.min_players,
                carryovers = round.carryovers,
                "round carried over"
            );
            self.store_round(round)?;
            return Ok(vec![Event::RoundCarriedOver {
                players: players as u64,
                ticket_price: config.ticket_price,
            }]);
        }

        let index = draw_winner(&self.entropy, &round)
            .ok_or_else(|| anyhow!("round {} met quorum with no entries", round.id))?;
        let winner = round.entries[index].player.clone();
        let round_id = round.id;
        let pool = round.pool;

        round.state = RoundState::Settled;
        round.winner = Some(winner.clone());
        round.settled_at_ms = Some(now_ms);
        self.store_round(round)?;

        let next_id = round_id
            .checked_add(1)
            .ok_or_else(|| anyhow!("round id overflow"))?;
        self.store_round(Round::open(next_id, now_ms))?;
        registry.current_round_id = next_id;
        self.insert(Key::LotteryRegistry, Value::LotteryRegistry(registry))?;

        info!(round_id, pool, players, winner = ?winner, "round settled");
        Ok(vec![
            Event::RoundSettled { round_id, pool },
            Event::RoundOpened {
                round_id: next_id,
                opened_at_ms: now_ms,
            },
        ])
    }

    pub(in crate::layer) fn handle_claim(
        &mut self,
        public: &PublicKey,
        round_id: u64,
    ) -> Result<Vec<Event>, ApplyError> {
        let mut round = match self.load_round(round_id)? {
            Some(round) if round.state == RoundState::Settled => round,
            _ => return Err(LotteryError::NotSettled { round_id }.into()),
        };
        if round.claimed {
            return Err(LotteryError::AlreadyClaimed { round_id }.into());
        }
        let winner = round
            .winner
            .clone()
            .ok_or_else(|| anyhow!("settled round {round_id} has no winner"))?;

        let config = self.lottery_config()?;
        self.transfer(&config.custody, &winner, round.pool)?;

        let amount = round.pool;
        round.claimed = true;
        self.store_round(round)?;

        debug!(caller = ?public, round_id, winner = ?winner, amount, "prize claimed");
        Ok(vec![Event::PrizeClaimed { winner, amount }])
    }
}
