//! Lottery domain types.
//!
//! Rounds, entries, the immutable engine configuration, the registry that
//! points at the open round, and the rejection taxonomy surfaced to callers.

use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, ReadRangeExt, Write};
use commonware_cryptography::ed25519::PublicKey;
use thiserror::Error as ThisError;

use crate::codec::{
    optional_key_encode_size, optional_u64_encode_size, read_optional_key, read_optional_u64,
    write_optional_key, write_optional_u64,
};
use crate::token::LedgerError;

/// Upper bound on entries a single round can hold (bounded by the codec).
pub const MAX_ROUND_ENTRIES: usize = 4_096;

pub const DEFAULT_MIN_PLAYERS: u32 = 3;

pub const ERROR_FORBIDDEN: u8 = 1;
pub const ERROR_EXPIRED: u8 = 2;
pub const ERROR_NOT_SETTLED: u8 = 3;
pub const ERROR_ALREADY_CLAIMED: u8 = 4;
pub const ERROR_ROUND_FULL: u8 = 5;

/// Reasons an instruction against the engine is rejected.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum LotteryError {
    #[error("forbidden: {reason}")]
    Forbidden { reason: &'static str },
    #[error("round {round_id} expired (expires_at_ms={expires_at_ms}, now_ms={now_ms})")]
    Expired {
        round_id: u64,
        expires_at_ms: u64,
        now_ms: u64,
    },
    #[error("round {round_id} is not settled")]
    NotSettled { round_id: u64 },
    #[error("prize for round {round_id} already claimed")]
    AlreadyClaimed { round_id: u64 },
    #[error("round is full (max={max})")]
    RoundFull { max: usize },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl LotteryError {
    pub fn code(&self) -> u8 {
        match self {
            Self::Forbidden { .. } => ERROR_FORBIDDEN,
            Self::Expired { .. } => ERROR_EXPIRED,
            Self::NotSettled { .. } => ERROR_NOT_SETTLED,
            Self::AlreadyClaimed { .. } => ERROR_ALREADY_CLAIMED,
            Self::RoundFull { .. } => ERROR_ROUND_FULL,
            Self::Ledger(err) => err.code(),
        }
    }
}

/// Errors in the engine configuration, reported before round 1 opens.
#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: u64 },
    #[error("min_players must be <= {max} (got {value})")]
    QuorumTooLarge { value: u32, max: usize },
    #[error("operator and custody must be different accounts")]
    CustodyConflict,
}

/// Immutable engine parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LotteryConfig {
    pub operator: PublicKey,
    /// Ledger account holding pooled stakes until they are claimed.
    pub custody: PublicKey,
    pub ticket_price: u64,
    pub round_duration_ms: u64,
    pub min_players: u32,
}

impl LotteryConfig {
    pub fn new(
        operator: PublicKey,
        custody: PublicKey,
        ticket_price: u64,
        round_duration_ms: u64,
    ) -> Self {
        Self {
            operator,
            custody,
            ticket_price,
            round_duration_ms,
            min_players: DEFAULT_MIN_PLAYERS,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_nonzero("ticket_price", self.ticket_price)?;
        ensure_nonzero("round_duration_ms", self.round_duration_ms)?;
        ensure_nonzero("min_players", self.min_players as u64)?;
        if self.min_players as usize > MAX_ROUND_ENTRIES {
            return Err(ConfigError::QuorumTooLarge {
                value: self.min_players,
                max: MAX_ROUND_ENTRIES,
            });
        }
        if self.operator == self.custody {
            return Err(ConfigError::CustodyConflict);
        }
        Ok(())
    }
}

fn ensure_nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidNonZero { field, value });
    }
    Ok(())
}

impl Write for LotteryConfig {
    fn write(&self, writer: &mut impl BufMut) {
        self.operator.write(writer);
        self.custody.write(writer);
        self.ticket_price.write(writer);
        self.round_duration_ms.write(writer);
        self.min_players.write(writer);
    }
}

impl Read for LotteryConfig {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            operator: PublicKey::read(reader)?,
            custody: PublicKey::read(reader)?,
            ticket_price: u64::read(reader)?,
            round_duration_ms: u64::read(reader)?,
            min_players: u32::read(reader)?,
        })
    }
}

impl FixedSize for LotteryConfig {
    const SIZE: usize = PublicKey::SIZE + PublicKey::SIZE + u64::SIZE + u64::SIZE + u32::SIZE;
}

/// Points at the open round and hands out player ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LotteryRegistry {
    pub current_round_id: u64,
    pub next_player_id: u64,
}

impl Default for LotteryRegistry {
    fn default() -> Self {
        Self {
            current_round_id: 1,
            next_player_id: 1,
        }
    }
}

impl LotteryRegistry {
    /// Returns the next player id and advances the counter.
    pub fn allocate_player_id(&mut self) -> Result<u64, LedgerError> {
        let id = self.next_player_id;
        self.next_player_id = id.checked_add(1).ok_or(LedgerError::Overflow)?;
        Ok(id)
    }
}

impl Write for LotteryRegistry {
    fn write(&self, writer: &mut impl BufMut) {
        self.current_round_id.write(writer);
        self.next_player_id.write(writer);
    }
}

impl Read for LotteryRegistry {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            current_round_id: u64::read(reader)?,
            next_player_id: u64::read(reader)?,
        })
    }
}

impl FixedSize for LotteryRegistry {
    const SIZE: usize = u64::SIZE + u64::SIZE;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RoundState {
    #[default]
    Open = 0,
    Settled = 1,
}

impl Write for RoundState {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for RoundState {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        match u8::read(reader)? {
            0 => Ok(Self::Open),
            1 => Ok(Self::Settled),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl FixedSize for RoundState {
    const SIZE: usize = 1;
}

/// One staked ticket. `player_id` is unique across all rounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub player_id: u64,
    pub player: PublicKey,
    pub round_id: u64,
    pub stake: u64,
}

impl Write for Entry {
    fn write(&self, writer: &mut impl BufMut) {
        self.player_id.write(writer);
        self.player.write(writer);
        self.round_id.write(writer);
        self.stake.write(writer);
    }
}

impl Read for Entry {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            player_id: u64::read(reader)?,
            player: PublicKey::read(reader)?,
            round_id: u64::read(reader)?,
            stake: u64::read(reader)?,
        })
    }
}

impl FixedSize for Entry {
    const SIZE: usize = u64::SIZE + PublicKey::SIZE + u64::SIZE + u64::SIZE;
}

/// A lottery round. `winner` is set iff the round is settled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Round {
    pub id: u64,
    pub state: RoundState,
    pub opened_at_ms: u64,
    pub entries: Vec<Entry>,
    pub pool: u64,
    pub winner: Option<PublicKey>,
    pub claimed: bool,
    pub carryovers: u32,
    pub settled_at_ms: Option<u64>,
}

impl Round {
    pub fn open(id: u64, opened_at_ms: u64) -> Self {
        Self {
            id,
            state: RoundState::Open,
            opened_at_ms,
            entries: Vec::new(),
            pool: 0,
            winner: None,
            claimed: false,
            carryovers: 0,
            settled_at_ms: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == RoundState::Open
    }

    pub fn expires_at_ms(&self, round_duration_ms: u64) -> u64 {
        self.opened_at_ms.saturating_add(round_duration_ms)
    }

    /// A round accepts entries up to and including its expiry instant.
    pub fn is_expired(&self, now_ms: u64, round_duration_ms: u64) -> bool {
        now_ms > self.expires_at_ms(round_duration_ms)
    }

    /// Sum of entry stakes; always equal to `pool`.
    pub fn total_stake(&self) -> u64 {
        self.entries
            .iter()
            .fold(0u64, |acc, entry| acc.saturating_add(entry.stake))
    }
}

impl Write for Round {
    fn write(&self, writer: &mut impl BufMut) {
        self.id.write(writer);
        self.state.write(writer);
        self.opened_at_ms.write(writer);
        self.entries.write(writer);
        self.pool.write(writer);
        write_optional_key(&self.winner, writer);
        self.claimed.write(writer);
        self.carryovers.write(writer);
        write_optional_u64(&self.settled_at_ms, writer);
    }
}

impl Read for Round {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let round = Self {
            id: u64::read(reader)?,
            state: RoundState::read(reader)?,
            opened_at_ms: u64::read(reader)?,
            entries: Vec::<Entry>::read_range(reader, 0..=MAX_ROUND_ENTRIES)?,
            pool: u64::read(reader)?,
            winner: read_optional_key(reader)?,
            claimed: bool::read(reader)?,
            carryovers: u32::read(reader)?,
            settled_at_ms: read_optional_u64(reader)?,
        };
        if round.winner.is_some() != (round.state == RoundState::Settled) {
            return Err(Error::Invalid("Round", "winner must be set iff settled"));
        }
        if round.claimed && round.state != RoundState::Settled {
            return Err(Error::Invalid("Round", "claimed round must be settled"));
        }
        Ok(round)
    }
}

impl EncodeSize for Round {
    fn encode_size(&self) -> usize {
        self.id.encode_size()
            + self.state.encode_size()
            + self.opened_at_ms.encode_size()
            + self.entries.encode_size()
            + self.pool.encode_size()
            + optional_key_encode_size(&self.winner)
            + self.claimed.encode_size()
            + self.carryovers.encode_size()
            + optional_u64_encode_size(&self.settled_at_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};
    use commonware_cryptography::{ed25519::PrivateKey, Signer};

    fn key(seed: u64) -> PublicKey {
        PrivateKey::from_seed(seed).public_key()
    }

    fn config() -> LotteryConfig {
        LotteryConfig::new(key(1), key(2), 100, 86_400_000)
    }

    #[test]
    fn config_defaults_to_three_player_quorum() {
        let config = config();
        assert_eq!(config.min_players, DEFAULT_MIN_PLAYERS);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn config_validation_rejects_degenerate_values() {
        let mut config = config();
        config.ticket_price = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidNonZero {
                field: "ticket_price",
                value: 0
            })
        );

        let mut config = self::config();
        config.min_players = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidNonZero {
                field: "min_players",
                ..
            })
        ));

        let mut config = self::config();
        config.min_players = MAX_ROUND_ENTRIES as u32 + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::QuorumTooLarge { .. })
        ));

        let mut config = self::config();
        config.custody = config.operator.clone();
        assert_eq!(config.validate(), Err(ConfigError::CustodyConflict));
    }

    #[test]
    fn expiry_is_inclusive_of_the_deadline() {
        let round = Round::open(1, 1_000);
        assert!(!round.is_expired(1_000, 500));
        assert!(!round.is_expired(1_500, 500));
        assert!(round.is_expired(1_501, 500));
        assert_eq!(Round::open(1, u64::MAX).expires_at_ms(1), u64::MAX);
    }

    #[test]
    fn round_encoding_matches_encode_size() {
        let mut round = Round::open(7, 42);
        for (i, seed) in [3u64, 4, 5].into_iter().enumerate() {
            round.entries.push(Entry {
                player_id: i as u64 + 1,
                player: key(seed),
                round_id: 7,
                stake: 100,
            });
            round.pool += 100;
        }
        round.state = RoundState::Settled;
        round.winner = Some(key(4));
        round.settled_at_ms = Some(99);

        let encoded = round.encode();
        assert_eq!(encoded.len(), round.encode_size());
        let decoded = Round::decode(encoded.as_ref()).expect("decode round");
        assert_eq!(decoded, round);
        assert_eq!(decoded.total_stake(), decoded.pool);
    }

    #[test]
    fn round_decoding_rejects_winner_on_open_round() {
        let mut round = Round::open(1, 0);
        round.winner = Some(key(3));
        let encoded = round.encode();
        assert!(matches!(
            Round::decode(encoded.as_ref()),
            Err(Error::Invalid("Round", _))
        ));
    }

    #[test]
    fn round_state_rejects_unknown_tag() {
        let buf = [9u8];
        assert!(matches!(
            RoundState::decode(buf.as_ref()),
            Err(Error::InvalidEnum(9))
        ));
    }

    #[test]
    fn registry_allocates_sequential_ids() {
        let mut registry = LotteryRegistry::default();
        assert_eq!(registry.allocate_player_id(), Ok(1));
        assert_eq!(registry.allocate_player_id(), Ok(2));
        assert_eq!(registry.next_player_id, 3);

        registry.next_player_id = u64::MAX;
        assert_eq!(registry.allocate_player_id(), Err(LedgerError::Overflow));
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            LotteryError::Forbidden { reason: "x" }.code(),
            ERROR_FORBIDDEN
        );
        assert_eq!(
            LotteryError::NotSettled { round_id: 1 }.code(),
            ERROR_NOT_SETTLED
        );
        assert_eq!(
            LotteryError::from(LedgerError::InsufficientAllowance {
                needed: 1,
                available: 0
            })
            .code(),
            crate::token::ERROR_INSUFFICIENT_ALLOWANCE
        );
    }
}
