use bytes::{Buf, BufMut};
use commonware_codec::{
    varint::UInt, Encode, EncodeSize, Error, FixedSize, RangeCfg, Read, ReadExt, Write,
};
use commonware_cryptography::{
    ed25519::{self, PublicKey},
    sha256::{Digest, Sha256},
    Digestible, Hasher, Signer, Verifier,
};
use commonware_utils::{modulo, union};

use crate::codec::{read_string, string_encode_size, write_string, MAX_MESSAGE_LENGTH};
use crate::lottery::{LotteryConfig, LotteryError, LotteryRegistry, Round};
use crate::token::{TokenAccount, TokenMetadata};

pub const NAMESPACE: &[u8] = b"_LOTTO";
pub const TRANSACTION_SUFFIX: &[u8] = b"_TX";
pub const MAX_BLOCK_TRANSACTIONS: usize = 500;

#[inline]
pub fn transaction_namespace(namespace: &[u8]) -> Vec<u8> {
    union(namespace, TRANSACTION_SUFFIX)
}

/// A signed instruction. `nonce` must equal the signer's account nonce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub nonce: u64,
    pub instruction: Instruction,

    pub public: ed25519::PublicKey,
    pub signature: ed25519::Signature,
}

impl Transaction {
    fn payload(nonce: &u64, instruction: &Instruction) -> Vec<u8> {
        let mut payload = Vec::new();
        nonce.write(&mut payload);
        instruction.write(&mut payload);

        payload
    }

    pub fn sign(private: &ed25519::PrivateKey, nonce: u64, instruction: Instruction) -> Self {
        let signature = private.sign(
            &transaction_namespace(NAMESPACE),
            &Self::payload(&nonce, &instruction),
        );

        Self {
            nonce,
            instruction,
            public: private.public_key(),
            signature,
        }
    }

    pub fn verify(&self) -> bool {
        self.public.verify(
            &transaction_namespace(NAMESPACE),
            &Self::payload(&self.nonce, &self.instruction),
            &self.signature,
        )
    }
}

impl Write for Transaction {
    fn write(&self, writer: &mut impl BufMut) {
        self.nonce.write(writer);
        self.instruction.write(writer);
        self.public.write(writer);
        self.signature.write(writer);
    }
}

impl Read for Transaction {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let nonce = u64::read(reader)?;
        let instruction = Instruction::read(reader)?;
        let public = ed25519::PublicKey::read(reader)?;
        let signature = ed25519::Signature::read(reader)?;

        Ok(Self {
            nonce,
            instruction,
            public,
            signature,
        })
    }
}

impl EncodeSize for Transaction {
    fn encode_size(&self) -> usize {
        self.nonce.encode_size()
            + self.instruction.encode_size()
            + self.public.encode_size()
            + self.signature.encode_size()
    }
}

impl Digestible for Transaction {
    type Digest = Digest;

    fn digest(&self) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(self.nonce.to_be_bytes().as_ref());
        hasher.update(self.instruction.encode().as_ref());
        hasher.update(self.public.as_ref());
        // Any valid signature is valid for the transaction, so it is not hashed.
        hasher.finalize()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    // Ledger instructions (tags 0-2)
    /// Create `amount` new tokens for `to`. Only the token authority may mint.
    Mint { to: PublicKey, amount: u64 },
    Transfer { to: PublicKey, amount: u64 },
    /// Overwrites the signer's allowance for `spender`.
    Approve { spender: PublicKey, amount: u64 },

    // Lottery instructions (tags 10-12)
    /// Stake the ticket price into the open round.
    Enter,
    /// Operator only. Settles the open round or carries it over.
    Settle,
    Claim { round_id: u64 },
}

impl Write for Instruction {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Mint { to, amount } => {
                0u8.write(writer);
                to.write(writer);
                amount.write(writer);
            }
            Self::Transfer { to, amount } => {
                1u8.write(writer);
                to.write(writer);
                amount.write(writer);
            }
            Self::Approve { spender, amount } => {
                2u8.write(writer);
                spender.write(writer);
                amount.write(writer);
            }
            Self::Enter => 10u8.write(writer),
            Self::Settle => 11u8.write(writer),
            Self::Claim { round_id } => {
                12u8.write(writer);
                round_id.write(writer);
            }
        }
    }
}

impl Read for Instruction {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let instruction = match u8::read(reader)? {
            0 => Self::Mint {
                to: PublicKey::read(reader)?,
                amount: u64::read(reader)?,
            },
            1 => Self::Transfer {
                to: PublicKey::read(reader)?,
                amount: u64::read(reader)?,
            },
            2 => Self::Approve {
                spender: PublicKey::read(reader)?,
                amount: u64::read(reader)?,
            },
            10 => Self::Enter,
            11 => Self::Settle,
            12 => Self::Claim {
                round_id: u64::read(reader)?,
            },
            i => return Err(Error::InvalidEnum(i)),
        };

        Ok(instruction)
    }
}

impl EncodeSize for Instruction {
    fn encode_size(&self) -> usize {
        u8::SIZE
            + match self {
                Self::Mint { .. } | Self::Transfer { .. } | Self::Approve { .. } => {
                    PublicKey::SIZE + u64::SIZE
                }
                Self::Enter | Self::Settle => 0,
                Self::Claim { .. } => u64::SIZE,
            }
    }
}

/// Block-level context every instruction executes against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub height: u64,
    pub timestamp_ms: u64,
    /// Fixed before the block's transactions are known; feeds winner selection.
    pub entropy: Digest,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub parent: Digest,

    pub height: u64,
    pub timestamp_ms: u64,

    pub transactions: Vec<Transaction>,

    digest: Digest,
}

impl Block {
    fn compute_digest(
        parent: &Digest,
        height: u64,
        timestamp_ms: u64,
        transactions: &[Transaction],
    ) -> Digest {
        let mut hasher = Sha256::new();
        hasher.update(parent);
        hasher.update(&height.to_be_bytes());
        hasher.update(&timestamp_ms.to_be_bytes());
        for transaction in transactions {
            hasher.update(&transaction.digest());
        }
        hasher.finalize()
    }

    pub fn new(
        parent: Digest,
        height: u64,
        timestamp_ms: u64,
        transactions: Vec<Transaction>,
    ) -> Self {
        assert!(transactions.len() <= MAX_BLOCK_TRANSACTIONS);
        let digest = Self::compute_digest(&parent, height, timestamp_ms, &transactions);
        Self {
            parent,
            height,
            timestamp_ms,
            transactions,
            digest,
        }
    }

    /// Entropy comes from the parent digest so a block's own transactions cannot steer it.
    pub fn header(&self) -> Header {
        Header {
            height: self.height,
            timestamp_ms: self.timestamp_ms,
            entropy: self.parent,
        }
    }
}

/// Genesis message to use during initialization.
const GENESIS: &[u8] = b"lotto genesis";

pub fn genesis_block() -> Block {
    let genesis_parent = Sha256::hash(GENESIS);
    Block::new(genesis_parent, 0, 0, vec![])
}

pub fn genesis_digest() -> Digest {
    genesis_block().digest()
}

impl Write for Block {
    fn write(&self, writer: &mut impl BufMut) {
        self.parent.write(writer);
        UInt(self.height).write(writer);
        UInt(self.timestamp_ms).write(writer);
        self.transactions.write(writer);
    }
}

impl Read for Block {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let parent = Digest::read(reader)?;
        let height: u64 = UInt::read(reader)?.into();
        let timestamp_ms: u64 = UInt::read(reader)?.into();
        let transactions = Vec::<Transaction>::read_cfg(
            reader,
            &(RangeCfg::from(0..=MAX_BLOCK_TRANSACTIONS), ()),
        )?;

        // Pre-compute the digest
        let digest = Self::compute_digest(&parent, height, timestamp_ms, &transactions);
        Ok(Self {
            parent,
            height,
            timestamp_ms,
            transactions,
            digest,
        })
    }
}

impl EncodeSize for Block {
    fn encode_size(&self) -> usize {
        self.parent.encode_size()
            + UInt(self.height).encode_size()
            + UInt(self.timestamp_ms).encode_size()
            + self.transactions.encode_size()
    }
}

impl Digestible for Block {
    type Digest = Digest;

    fn digest(&self) -> Digest {
        self.digest
    }
}

/// Index of the selected participant: the seed reduced modulo the participant count.
pub fn winner_index(seed: &[u8], participants: usize) -> usize {
    modulo(seed, participants as u64) as usize
}

/// Nonce tracking for replay protection.
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub struct Account {
    pub nonce: u64,
}

impl Write for Account {
    fn write(&self, writer: &mut impl BufMut) {
        self.nonce.write(writer);
    }
}

impl Read for Account {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            nonce: u64::read(reader)?,
        })
    }
}

impl EncodeSize for Account {
    fn encode_size(&self) -> usize {
        self.nonce.encode_size()
    }
}

#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Clone, Debug)]
pub enum Key {
    /// Account for nonce tracking (tag 0)
    Account(PublicKey),
    /// Height of the last executed block (tag 1)
    Commit,

    // Ledger keys (tags 2-3)
    TokenMetadata,
    TokenAccount(PublicKey),

    // Lottery keys (tags 10-12)
    LotteryConfig,
    LotteryRegistry,
    Round(u64),
}

impl Write for Key {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Account(pk) => {
                0u8.write(writer);
                pk.write(writer);
            }
            Self::Commit => 1u8.write(writer),

            Self::TokenMetadata => 2u8.write(writer),
            Self::TokenAccount(pk) => {
                3u8.write(writer);
                pk.write(writer);
            }

            Self::LotteryConfig => 10u8.write(writer),
            Self::LotteryRegistry => 11u8.write(writer),
            Self::Round(id) => {
                12u8.write(writer);
                id.write(writer);
            }
        }
    }
}

impl Read for Key {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let key = match u8::read(reader)? {
            0 => Self::Account(PublicKey::read(reader)?),
            1 => Self::Commit,

            2 => Self::TokenMetadata,
            3 => Self::TokenAccount(PublicKey::read(reader)?),

            10 => Self::LotteryConfig,
            11 => Self::LotteryRegistry,
            12 => Self::Round(u64::read(reader)?),

            i => return Err(Error::InvalidEnum(i)),
        };

        Ok(key)
    }
}

impl EncodeSize for Key {
    fn encode_size(&self) -> usize {
        u8::SIZE
            + match self {
                Self::Account(_) | Self::TokenAccount(_) => PublicKey::SIZE,
                Self::Round(_) => u64::SIZE,
                Self::Commit
                | Self::TokenMetadata
                | Self::LotteryConfig
                | Self::LotteryRegistry => 0,
            }
    }
}

#[derive(Clone, Eq, PartialEq, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum Value {
    Account(Account),
    Commit { height: u64 },

    TokenMetadata(TokenMetadata),
    TokenAccount(TokenAccount),

    LotteryConfig(LotteryConfig),
    LotteryRegistry(LotteryRegistry),
    Round(Round),
}

impl Write for Value {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Account(account) => {
                0u8.write(writer);
                account.write(writer);
            }
            Self::Commit { height } => {
                1u8.write(writer);
                height.write(writer);
            }

            Self::TokenMetadata(metadata) => {
                2u8.write(writer);
                metadata.write(writer);
            }
            Self::TokenAccount(account) => {
                3u8.write(writer);
                account.write(writer);
            }

            Self::LotteryConfig(config) => {
                10u8.write(writer);
                config.write(writer);
            }
            Self::LotteryRegistry(registry) => {
                11u8.write(writer);
                registry.write(writer);
            }
            Self::Round(round) => {
                12u8.write(writer);
                round.write(writer);
            }
        }
    }
}

impl Read for Value {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let value = match u8::read(reader)? {
            0 => Self::Account(Account::read(reader)?),
            1 => Self::Commit {
                height: u64::read(reader)?,
            },

            2 => Self::TokenMetadata(TokenMetadata::read(reader)?),
            3 => Self::TokenAccount(TokenAccount::read(reader)?),

            10 => Self::LotteryConfig(LotteryConfig::read(reader)?),
            11 => Self::LotteryRegistry(LotteryRegistry::read(reader)?),
            12 => Self::Round(Round::read(reader)?),

            i => return Err(Error::InvalidEnum(i)),
        };

        Ok(value)
    }
}

impl EncodeSize for Value {
    fn encode_size(&self) -> usize {
        u8::SIZE
            + match self {
                Self::Account(account) => account.encode_size(),
                Self::Commit { height } => height.encode_size(),
                Self::TokenMetadata(metadata) => metadata.encode_size(),
                Self::TokenAccount(account) => account.encode_size(),
                Self::LotteryConfig(config) => config.encode_size(),
                Self::LotteryRegistry(registry) => registry.encode_size(),
                Self::Round(round) => round.encode_size(),
            }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// An instruction was rejected and left state unchanged (tag 0).
    Rejected {
        caller: PublicKey,
        error_code: u8,
        message: String,
    },

    // Ledger events (tags 1-3)
    Minted {
        to: PublicKey,
        amount: u64,
        total_supply: u64,
    },
    Transferred {
        from: PublicKey,
        to: PublicKey,
        amount: u64,
    },
    Approved {
        owner: PublicKey,
        spender: PublicKey,
        amount: u64,
    },

    // Lottery events (tags 10-14)
    PlayerJoined {
        player_id: u64,
        player: PublicKey,
        round_id: u64,
        pool: u64,
    },
    RoundSettled {
        round_id: u64,
        pool: u64,
    },
    RoundCarriedOver {
        players: u64,
        ticket_price: u64,
    },
    PrizeClaimed {
        winner: PublicKey,
        amount: u64,
    },
    RoundOpened {
        round_id: u64,
        opened_at_ms: u64,
    },
}

impl Event {
    /// Builds a rejection event, truncating the message to the encodable bound.
    pub fn rejected(caller: PublicKey, error: &LotteryError) -> Self {
        let mut message = error.to_string();
        if message.len() > MAX_MESSAGE_LENGTH {
            let mut end = MAX_MESSAGE_LENGTH;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        Self::Rejected {
            caller,
            error_code: error.code(),
            message,
        }
    }
}

impl Write for Event {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Rejected {
                caller,
                error_code,
                message,
            } => {
                0u8.write(writer);
                caller.write(writer);
                error_code.write(writer);
                write_string(message, writer);
            }
            Self::Minted {
                to,
                amount,
                total_supply,
            } => {
                1u8.write(writer);
                to.write(writer);
                amount.write(writer);
                total_supply.write(writer);
            }
            Self::Transferred { from, to, amount } => {
                2u8.write(writer);
                from.write(writer);
                to.write(writer);
                amount.write(writer);
            }
            Self::Approved {
                owner,
                spender,
                amount,
            } => {
                3u8.write(writer);
                owner.write(writer);
                spender.write(writer);
                amount.write(writer);
            }
            Self::PlayerJoined {
                player_id,
                player,
                round_id,
                pool,
            } => {
                10u8.write(writer);
                player_id.write(writer);
                player.write(writer);
                round_id.write(writer);
                pool.write(writer);
            }
            Self::RoundSettled { round_id, pool } => {
                11u8.write(writer);
                round_id.write(writer);
                pool.write(writer);
            }
            Self::RoundCarriedOver {
                players,
                ticket_price,
            } => {
                12u8.write(writer);
                players.write(writer);
                ticket_price.write(writer);
            }
            Self::PrizeClaimed { winner, amount } => {
                13u8.write(writer);
                winner.write(writer);
                amount.write(writer);
            }
            Self::RoundOpened {
                round_id,
                opened_at_ms,
            } => {
                14u8.write(writer);
                round_id.write(writer);
                opened_at_ms.write(writer);
            }
        }
    }
}

impl Read for Event {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let event = match u8::read(reader)? {
            0 => Self::Rejected {
                caller: PublicKey::read(reader)?,
                error_code: u8::read(reader)?,
                message: read_string(reader, MAX_MESSAGE_LENGTH)?,
            },
            1 => Self::Minted {
                to: PublicKey::read(reader)?,
                amount: u64::read(reader)?,
                total_supply: u64::read(reader)?,
            },
            2 => Self::Transferred {
                from: PublicKey::read(reader)?,
                to: PublicKey::read(reader)?,
                amount: u64::read(reader)?,
            },
            3 => Self::Approved {
                owner: PublicKey::read(reader)?,
                spender: PublicKey::read(reader)?,
                amount: u64::read(reader)?,
            },
            10 => Self::PlayerJoined {
                player_id: u64::read(reader)?,
                player: PublicKey::read(reader)?,
                round_id: u64::read(reader)?,
                pool: u64::read(reader)?,
            },
            11 => Self::RoundSettled {
                round_id: u64::read(reader)?,
                pool: u64::read(reader)?,
            },
            12 => Self::RoundCarriedOver {
                players: u64::read(reader)?,
                ticket_price: u64::read(reader)?,
            },
            13 => Self::PrizeClaimed {
                winner: PublicKey::read(reader)?,
                amount: u64::read(reader)?,
            },
            14 => Self::RoundOpened {
                round_id: u64::read(reader)?,
                opened_at_ms: u64::read(reader)?,
            },
            i => return Err(Error::InvalidEnum(i)),
        };

        Ok(event)
    }
}

impl EncodeSize for Event {
    fn encode_size(&self) -> usize {
        u8::SIZE
            + match self {
                Self::Rejected { message, .. } => {
                    PublicKey::SIZE + u8::SIZE + string_encode_size(message)
                }
                Self::Minted { .. } => PublicKey::SIZE + u64::SIZE + u64::SIZE,
                Self::Transferred { .. } => PublicKey::SIZE + PublicKey::SIZE + u64::SIZE,
                Self::Approved { .. } => PublicKey::SIZE + PublicKey::SIZE + u64::SIZE,
                Self::PlayerJoined { .. } => u64::SIZE + PublicKey::SIZE + u64::SIZE + u64::SIZE,
                Self::RoundSettled { .. } => u64::SIZE + u64::SIZE,
                Self::RoundCarriedOver { .. } => u64::SIZE + u64::SIZE,
                Self::PrizeClaimed { .. } => PublicKey::SIZE + u64::SIZE,
                Self::RoundOpened { .. } => u64::SIZE + u64::SIZE,
            }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Event(Event),
    Transaction(Transaction),
    Commit { height: u64 },
}

impl Write for Output {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Event(event) => {
                0u8.write(writer);
                event.write(writer);
            }
            Self::Transaction(transaction) => {
                1u8.write(writer);
                transaction.write(writer);
            }
            Self::Commit { height } => {
                2u8.write(writer);
                height.write(writer);
            }
        }
    }
}

impl Read for Output {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Self::Event(Event::read(reader)?)),
            1 => Ok(Self::Transaction(Transaction::read(reader)?)),
            2 => Ok(Self::Commit {
                height: u64::read(reader)?,
            }),
            _ => Err(Error::InvalidEnum(kind)),
        }
    }
}

impl EncodeSize for Output {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Event(event) => event.encode_size(),
            Self::Transaction(transaction) => transaction.encode_size(),
            Self::Commit { height } => height.encode_size(),
        }
    }
}
