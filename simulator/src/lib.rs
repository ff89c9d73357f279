//! Local driver for the lotto settlement engine.
//!
//! The simulator provisions a population of players on an in-memory state,
//! then plays a number of rounds through signed transactions and sequential
//! blocks, exactly as a chain would feed them to the execution layer.

use anyhow::{Context, Result};
use commonware_cryptography::{
    ed25519::{PrivateKey, PublicKey},
    sha256::Digest,
    Digestible, Signer,
};
use lotto_execution::{
    execute_state_transition, initialize, nonce, query_balance, query_token_account,
    query_token_metadata, query_winner, Memory,
};
use lotto_types::{
    execution::{Block, Event, Instruction, Output, Transaction, MAX_BLOCK_TRANSACTIONS},
    genesis_digest,
    token::key_hex,
    ConfigError as LotteryConfigError, LotteryConfig, TokenAccount, TokenMetadata,
    MAX_ROUND_ENTRIES,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, str::FromStr};
use thiserror::Error;
use tracing::{debug, info, warn, Level};

/// Simulation parameters, usually read from a YAML file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Seed for key derivation and player behavior.
    pub seed: u64,
    pub players: usize,
    pub rounds: usize,
    pub ticket_price: u64,
    pub round_duration_ms: u64,
    #[serde(default = "default_min_players")]
    pub min_players: u32,
    pub initial_balance: u64,
    /// Chance that a given player enters a given round.
    #[serde(default = "default_entry_probability")]
    pub entry_probability: f64,
    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,
    #[serde(default)]
    pub start_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("players must be <= {max} (got {value})")]
    TooManyPlayers { value: usize, max: usize },
    #[error("entry_probability must be within [0, 1] (got {value})")]
    InvalidProbability { value: f64 },
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("invalid lottery config: {0}")]
    Lottery(#[from] LotteryConfigError),
}

/// Parameters that passed validation.
#[derive(Clone)]
pub struct ValidatedConfig {
    pub seed: u64,
    pub players: usize,
    pub rounds: usize,
    pub initial_balance: u64,
    pub entry_probability: f64,
    pub block_interval_ms: u64,
    pub start_ms: u64,
    pub log_level: Level,
    pub keys: Keys,
    pub lottery: LotteryConfig,
}

/// Keys of the fixed participants, derived from the configured seed.
#[derive(Clone)]
pub struct Keys {
    pub authority: PrivateKey,
    pub operator: PrivateKey,
    pub custody: PublicKey,
}

impl Keys {
    pub fn derive(seed: u64) -> Self {
        Self {
            authority: PrivateKey::from_seed(seed),
            operator: PrivateKey::from_seed(seed.wrapping_add(1)),
            custody: PrivateKey::from_seed(seed.wrapping_add(2)).public_key(),
        }
    }

    /// Key of the `index`th player.
    pub fn player(seed: u64, index: usize) -> PrivateKey {
        PrivateKey::from_seed(seed.wrapping_add(3).wrapping_add(index as u64))
    }
}

fn default_min_players() -> u32 {
    lotto_types::lottery::DEFAULT_MIN_PLAYERS
}

fn default_entry_probability() -> f64 {
    0.8
}

fn default_block_interval_ms() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn ensure_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

impl Config {
    /// Reads and parses a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("could not parse config file {}", path.display()))
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        ensure_nonzero("players", self.players as u64)?;
        ensure_nonzero("rounds", self.rounds as u64)?;
        ensure_nonzero("initial_balance", self.initial_balance)?;
        ensure_nonzero("block_interval_ms", self.block_interval_ms)?;
        if self.players > MAX_ROUND_ENTRIES {
            return Err(ConfigError::TooManyPlayers {
                value: self.players,
                max: MAX_ROUND_ENTRIES,
            });
        }
        if !(0.0..=1.0).contains(&self.entry_probability) {
            return Err(ConfigError::InvalidProbability {
                value: self.entry_probability,
            });
        }
        let log_level = Level::from_str(&self.log_level).map_err(|_| {
            ConfigError::InvalidLogLevel {
                value: self.log_level.clone(),
            }
        })?;

        let keys = Keys::derive(self.seed);
        let mut lottery = LotteryConfig::new(
            keys.operator.public_key(),
            keys.custody.clone(),
            self.ticket_price,
            self.round_duration_ms,
        );
        lottery.min_players = self.min_players;
        lottery.validate()?;

        Ok(ValidatedConfig {
            seed: self.seed,
            players: self.players,
            rounds: self.rounds,
            initial_balance: self.initial_balance,
            entry_probability: self.entry_probability,
            block_interval_ms: self.block_interval_ms,
            start_ms: self.start_ms,
            log_level,
            keys,
            lottery,
        })
    }
}

/// Outcome of a single settle attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoundOutcome {
    pub round_id: u64,
    pub players: usize,
    pub pool: u64,
    /// Hex public key of the winner, if the round settled.
    pub winner: Option<String>,
    pub claimed: bool,
}

/// Summary of a simulation run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub height: u64,
    pub settled: usize,
    pub carried_over: usize,
    pub rejected: usize,
    pub total_paid: u64,
    pub custody_balance: u64,
    pub outcomes: Vec<RoundOutcome>,
    /// Ledger metadata at the end of the run.
    pub token: Option<TokenMetadata>,
    /// Final token accounts of custody and every player, by hex key.
    pub accounts: BTreeMap<String, TokenAccount>,
}

/// Drives the engine over an in-memory state.
pub struct Simulator {
    config: ValidatedConfig,
    state: Memory,
    players: Vec<PrivateKey>,
    rng: StdRng,
    parent: Digest,
    height: u64,
    now_ms: u64,
    report: Report,
}

impl Simulator {
    /// Initializes the engine and funds every player.
    pub fn new(config: ValidatedConfig) -> Result<Self> {
        let mut state = Memory::default();
        let token = TokenMetadata::new("Stake", "STK", config.keys.authority.public_key());
        initialize(&mut state, token, config.lottery.clone(), config.start_ms)
            .context("failed to initialize lottery")?;

        let players = (0..config.players)
            .map(|index| Keys::player(config.seed, index))
            .collect();
        let mut simulator = Self {
            rng: StdRng::seed_from_u64(config.seed),
            now_ms: config.start_ms,
            config,
            state,
            players,
            parent: genesis_digest(),
            height: 0,
            report: Report::default(),
        };
        simulator.provision()?;
        Ok(simulator)
    }

    pub fn state(&self) -> &Memory {
        &self.state
    }

    fn provision(&mut self) -> Result<()> {
        let authority = self.config.keys.authority.clone();
        let mut next = nonce(&self.state, &authority.public_key())?;
        let mints: Vec<Transaction> = self
            .players
            .iter()
            .map(|player| {
                let tx = Transaction::sign(
                    &authority,
                    next,
                    Instruction::Mint {
                        to: player.public_key(),
                        amount: self.config.initial_balance,
                    },
                );
                next += 1;
                tx
            })
            .collect();
        self.submit(mints)?;

        let mut approvals = Vec::with_capacity(self.players.len());
        for player in &self.players {
            let nonce = nonce(&self.state, &player.public_key())?;
            approvals.push(Transaction::sign(
                player,
                nonce,
                Instruction::Approve {
                    spender: self.config.keys.custody.clone(),
                    amount: u64::MAX,
                },
            ));
        }
        self.submit(approvals)?;
        info!(
            players = self.players.len(),
            initial_balance = self.config.initial_balance,
            "provisioned players"
        );
        Ok(())
    }

    /// Executes `transactions` in as many blocks as needed and returns the events.
    fn submit(&mut self, transactions: Vec<Transaction>) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        let mut chunks: Vec<Vec<Transaction>> = transactions
            .chunks(MAX_BLOCK_TRANSACTIONS)
            .map(|chunk| chunk.to_vec())
            .collect();
        if chunks.is_empty() {
            chunks.push(Vec::new());
        }
        for chunk in chunks {
            self.height += 1;
            self.now_ms = self.now_ms.saturating_add(self.config.block_interval_ms);
            let block = Block::new(self.parent, self.height, self.now_ms, chunk);
            let result = execute_state_transition(&mut self.state, &block)
                .with_context(|| format!("failed to execute block {}", self.height))?;
            self.parent = block.digest();
            for output in result.outputs {
                if let Output::Event(event) = output {
                    if let Event::Rejected {
                        caller,
                        error_code,
                        message,
                    } = &event
                    {
                        debug!(caller = %key_hex(caller), error_code, reason = %message, "transaction rejected");
                        self.report.rejected += 1;
                    }
                    events.push(event);
                }
            }
        }
        Ok(events)
    }

    /// Plays one round: entries, settle and, when a winner is drawn, claim.
    pub fn play_round(&mut self) -> Result<RoundOutcome> {
        let mut entries = Vec::new();
        for player in &self.players {
            if !self.rng.gen_bool(self.config.entry_probability) {
                continue;
            }
            let nonce = nonce(&self.state, &player.public_key())?;
            entries.push(Transaction::sign(player, nonce, Instruction::Enter));
        }
        self.submit(entries)?;

        let operator = self.config.keys.operator.clone();
        let settle = Transaction::sign(
            &operator,
            nonce(&self.state, &operator.public_key())?,
            Instruction::Settle,
        );
        let events = self.submit(vec![settle])?;

        for event in events {
            match event {
                Event::RoundSettled { round_id, pool } => {
                    let round = lotto_execution::query_round(&self.state, round_id)?;
                    let winner = query_winner(&self.state, round_id)?
                        .context("settled round without winner")?;
                    let claimed = self.claim(round_id, &winner, pool)?;
                    self.report.settled += 1;
                    return Ok(RoundOutcome {
                        round_id,
                        players: round.entries.len(),
                        pool,
                        winner: Some(key_hex(&winner)),
                        claimed,
                    });
                }
                Event::RoundCarriedOver { players, .. } => {
                    let round = lotto_execution::query_current_round(&self.state)?;
                    self.report.carried_over += 1;
                    return Ok(RoundOutcome {
                        round_id: round.id,
                        players: players as usize,
                        pool: round.pool,
                        winner: None,
                        claimed: false,
                    });
                }
                _ => {}
            }
        }
        anyhow::bail!("settle produced neither a settlement nor a carryover")
    }

    /// The winner claims their own prize.
    fn claim(&mut self, round_id: u64, winner: &PublicKey, pool: u64) -> Result<bool> {
        let Some(signer) = self
            .players
            .iter()
            .find(|player| &player.public_key() == winner)
            .cloned()
        else {
            warn!(round_id, winner = %key_hex(winner), "winner is not a known player");
            return Ok(false);
        };
        let claim = Transaction::sign(
            &signer,
            nonce(&self.state, winner)?,
            Instruction::Claim { round_id },
        );
        let events = self.submit(vec![claim])?;
        let claimed = events.iter().any(|event| {
            matches!(event, Event::PrizeClaimed { winner: paid, amount } if paid == winner && *amount == pool)
        });
        if claimed {
            self.report.total_paid += pool;
        }
        Ok(claimed)
    }

    /// Plays every configured round and returns the report.
    pub fn run(mut self) -> Result<Report> {
        for _ in 0..self.config.rounds {
            let outcome = self.play_round()?;
            info!(
                round_id = outcome.round_id,
                players = outcome.players,
                pool = outcome.pool,
                winner = outcome.winner.as_deref().unwrap_or("-"),
                "round finished"
            );
            self.report.outcomes.push(outcome);
        }
        self.report.height = self.height;
        self.report.custody_balance = query_balance(&self.state, &self.config.keys.custody)?;
        self.report.token = Some(query_token_metadata(&self.state)?);
        let holders = std::iter::once(self.config.keys.custody.clone())
            .chain(self.players.iter().map(|player| player.public_key()));
        for holder in holders {
            let account = query_token_account(&self.state, &holder)?;
            self.report.accounts.insert(key_hex(&holder), account);
        }
        Ok(self.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            seed: 7,
            players: 5,
            rounds: 4,
            ticket_price: 100,
            round_duration_ms: 60_000,
            min_players: 3,
            initial_balance: 1_000,
            entry_probability: 1.0,
            block_interval_ms: 1_000,
            start_ms: 0,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn parses_yaml_with_defaults() {
        let yaml = "
seed: 1
players: 4
rounds: 2
ticket_price: 100
round_duration_ms: 60000
initial_balance: 500
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.min_players, 3);
        assert_eq!(config.entry_probability, 0.8);
        assert_eq!(config.block_interval_ms, 1_000);
        assert_eq!(config.log_level, "info");
        let validated = config.validate().unwrap();
        assert_eq!(validated.log_level, Level::INFO);
        assert_eq!(validated.lottery.ticket_price, 100);
    }

    #[test]
    fn rejects_invalid_config() {
        let mut bad = config();
        bad.players = 0;
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::InvalidNonZero { field: "players", .. })
        ));

        let mut bad = config();
        bad.entry_probability = 1.5;
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::InvalidProbability { .. })
        ));

        let mut bad = config();
        bad.log_level = "loud".to_string();
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::InvalidLogLevel { .. })
        ));

        let mut bad = config();
        bad.ticket_price = 0;
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::Lottery(LotteryConfigError::InvalidNonZero {
                field: "ticket_price",
                ..
            }))
        ));
    }

    #[test]
    fn full_participation_settles_every_round() {
        let report = Simulator::new(config().validate().unwrap())
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(report.settled, 4);
        assert_eq!(report.carried_over, 0);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.total_paid, 4 * 5 * 100);
        assert_eq!(report.custody_balance, 0);
        for (i, outcome) in report.outcomes.iter().enumerate() {
            assert_eq!(outcome.round_id, i as u64 + 1);
            assert_eq!(outcome.players, 5);
            assert_eq!(outcome.pool, 500);
            assert!(outcome.winner.is_some());
            assert!(outcome.claimed);
        }
    }

    #[test]
    fn small_population_carries_over() {
        let mut config = config();
        config.players = 2;
        config.rounds = 3;
        let report = Simulator::new(config.validate().unwrap())
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(report.settled, 0);
        assert_eq!(report.carried_over, 3);
        // The same round keeps accumulating entries.
        let pools: Vec<u64> = report.outcomes.iter().map(|o| o.pool).collect();
        assert_eq!(pools, vec![200, 400, 600]);
        assert!(report.outcomes.iter().all(|o| o.round_id == 1));
        assert_eq!(report.custody_balance, 600);
    }

    #[test]
    fn report_snapshots_token_accounts() {
        let mut config = config();
        config.entry_probability = 0.5;
        let validated = config.validate().unwrap();
        let custody = key_hex(&validated.keys.custody);
        let first_player = key_hex(&Keys::player(validated.seed, 0).public_key());

        let report = Simulator::new(validated).unwrap().run().unwrap();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["token"]["symbol"], "STK");
        assert_eq!(json["token"]["total_supply"], 5 * 1_000);
        assert_eq!(report.accounts.len(), 6);
        assert_eq!(
            json["accounts"][&custody]["balance"],
            report.custody_balance
        );
        let allowances = json["accounts"][&first_player]["allowances"]
            .as_array()
            .unwrap();
        assert!(allowances.iter().any(|entry| entry[0] == custody.as_str()));

        let held: u64 = report.accounts.values().map(|account| account.balance).sum();
        assert_eq!(held, 5 * 1_000);
    }

    #[test]
    fn runs_are_deterministic() {
        let mut config = config();
        config.entry_probability = 0.6;
        config.rounds = 6;
        let first = Simulator::new(config.clone().validate().unwrap())
            .unwrap()
            .run()
            .unwrap();
        let second = Simulator::new(config.validate().unwrap())
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn balances_are_conserved() {
        let mut config = config();
        config.entry_probability = 0.5;
        config.rounds = 8;
        let validated = config.validate().unwrap();
        let seed = validated.seed;
        let players = validated.players;
        let custody = validated.keys.custody.clone();
        let initial = validated.initial_balance;

        let mut simulator = Simulator::new(validated).unwrap();
        for _ in 0..8 {
            simulator.play_round().unwrap();
        }
        let held: u64 = (0..players)
            .map(|i| query_balance(simulator.state(), &Keys::player(seed, i).public_key()).unwrap())
            .sum();
        let custody = query_balance(simulator.state(), &custody).unwrap();
        assert_eq!(held + custody, initial * players as u64);
    }
}
