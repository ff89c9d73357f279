//! Winner selection entropy.
//!
//! The draw is `winner_seed(round) mod entries.len()`. The default source
//! hashes the block entropy together with the round id and entry count:
//! ```text
//! seed = sha256(entropy || round_id || entry_count || "winner")
//! ```
//!
//! This is a placeholder, not a VRF: whoever controls the block entropy can
//! predict (and with enough influence, steer) the outcome. Anything handling
//! real value should swap in a verifiable source through [`EntropySource`].

use commonware_cryptography::{
    sha256::{Digest, Sha256},
    Hasher,
};
use lotto_types::{winner_index, Round};

/// Length of a winner seed in bytes.
pub const SEED_LEN: usize = 32;

const WINNER_SUFFIX: &[u8] = b"winner";

/// Source of the seed used to draw a round's winner.
pub trait EntropySource {
    fn winner_seed(&self, round: &Round) -> [u8; SEED_LEN];
}

/// Derives winner seeds from a block's entropy digest.
#[derive(Clone, Debug)]
pub struct SeedEntropy {
    entropy: Digest,
}

impl SeedEntropy {
    pub fn new(entropy: Digest) -> Self {
        Self { entropy }
    }
}

impl EntropySource for SeedEntropy {
    fn winner_seed(&self, round: &Round) -> [u8; SEED_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(self.entropy.as_ref());
        hasher.update(&round.id.to_be_bytes());
        hasher.update(&(round.entries.len() as u64).to_be_bytes());
        hasher.update(WINNER_SUFFIX);
        let digest = hasher.finalize();

        let mut seed = [0u8; SEED_LEN];
        seed.copy_from_slice(digest.as_ref());
        seed
    }
}

/// Always yields the same seed. Lets tests pin the outcome of a draw.
#[cfg(any(test, feature = "mocks"))]
#[derive(Clone, Debug)]
pub struct FixedEntropy(pub [u8; SEED_LEN]);

#[cfg(any(test, feature = "mocks"))]
impl FixedEntropy {
    /// A seed that selects entry `index` out of `participants`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below `participants`.
    pub fn selecting(index: u64, participants: u64) -> Self {
        assert!(index < participants);
        let mut seed = [0u8; SEED_LEN];
        seed[SEED_LEN - 8..].copy_from_slice(&index.to_be_bytes());
        Self(seed)
    }
}

#[cfg(any(test, feature = "mocks"))]
impl EntropySource for FixedEntropy {
    fn winner_seed(&self, _round: &Round) -> [u8; SEED_LEN] {
        self.0
    }
}

/// Picks the index of the winning entry. `None` when the round has no entries.
pub fn draw_winner<E: EntropySource + ?Sized>(source: &E, round: &Round) -> Option<usize> {
    if round.entries.is_empty() {
        return None;
    }
    let seed = source.winner_seed(round);
    Some(winner_index(&seed, round.entries.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_cryptography::{ed25519::PrivateKey, Signer};
    use lotto_types::Entry;

    fn round_with(id: u64, players: u64) -> Round {
        let mut round = Round::open(id, 0);
        for seed in 0..players {
            round.entries.push(Entry {
                player_id: seed + 1,
                player: PrivateKey::from_seed(seed).public_key(),
                round_id: id,
                stake: 100,
            });
            round.pool += 100;
        }
        round
    }

    #[test]
    fn empty_round_has_no_winner() {
        let source = SeedEntropy::new(Sha256::hash(b"block"));
        assert_eq!(draw_winner(&source, &Round::open(1, 0)), None);
    }

    #[test]
    fn seed_is_deterministic_and_round_scoped() {
        let source = SeedEntropy::new(Sha256::hash(b"block"));
        let a = round_with(1, 3);
        let b = round_with(2, 3);
        assert_eq!(source.winner_seed(&a), source.winner_seed(&a));
        assert_ne!(source.winner_seed(&a), source.winner_seed(&b));

        let other = SeedEntropy::new(Sha256::hash(b"other block"));
        assert_ne!(source.winner_seed(&a), other.winner_seed(&a));
    }

    #[test]
    fn fixed_entropy_selects_requested_index() {
        let round = round_with(1, 5);
        for index in 0..5 {
            let source = FixedEntropy::selecting(index, 5);
            assert_eq!(draw_winner(&source, &round), Some(index as usize));
        }
    }

    #[test]
    #[should_panic]
    fn selecting_index_outside_participants_panics() {
        FixedEntropy::selecting(3, 3);
    }

    #[test]
    fn draw_is_roughly_uniform() {
        let round = round_with(1, 4);
        let mut counts = [0u32; 4];
        for i in 0..4_000u32 {
            let source = SeedEntropy::new(Sha256::hash(&i.to_be_bytes()));
            let index = draw_winner(&source, &round).unwrap();
            counts[index] += 1;
        }
        for count in counts {
            assert!((800..=1_200).contains(&count), "skewed draw: {counts:?}");
        }
    }
}
