//! Outcome generation for a round.
//!
//! The engine treats the generator as a black box invoked once per round
//! with a [`RoundSeed`]. [`HashCrashGenerator`] derives a crash multiplier
//! from the sha256 of the seed, so anyone holding the revealed seed can
//! recompute the outcome.

use std::fmt;

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// Errors from an [`OutcomeGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutcomeError {
    /// The generator could not produce a value.
    #[error("outcome generator unavailable: {0}")]
    Unavailable(String),
}

/// Seed material for one round: a server secret plus the round number.
#[derive(Clone, PartialEq, Eq)]
pub struct RoundSeed {
    server_seed: String,
    nonce: u64,
}

impl RoundSeed {
    /// Creates the seed for round number `nonce`.
    #[must_use]
    pub fn new(server_seed: impl Into<String>, nonce: u64) -> Self {
        Self {
            server_seed: server_seed.into(),
            nonce,
        }
    }

    /// The seed string revealed when the round ends.
    #[must_use]
    pub fn reveal(&self) -> String {
        format!("{}:{}", self.server_seed, self.nonce)
    }

    /// Raw sha256 digest of the revealed seed.
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.reveal().as_bytes()).into()
    }

    /// Hex commitment published when the round opens.
    #[must_use]
    pub fn commitment(&self) -> String {
        hex::encode(self.digest())
    }
}

impl fmt::Debug for RoundSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundSeed")
            .field("nonce", &self.nonce)
            .field("commitment", &self.commitment())
            .finish_non_exhaustive()
    }
}

/// Produces a round's outcome (crash multiplier) from its seed.
pub trait OutcomeGenerator: fmt::Debug + Send + Sync {
    /// Returns the outcome for `seed`. Must be deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`OutcomeError`] when no outcome can be produced.
    fn generate(&self, seed: &RoundSeed) -> Result<Decimal, OutcomeError>;
}

/// sha256-based crash multiplier with a configurable house edge.
///
/// The first 52 bits of the digest give `r` in `[0, 2^52)`; the multiplier
/// is `(2^52 * 100 - r) / (2^52 - r) * (1 - edge) / 100`, floored to two
/// decimals, clamped to `[1.00, max]`.
#[derive(Debug, Clone)]
pub struct HashCrashGenerator {
    house_edge_bps: u32,
    max_multiplier: Decimal,
}

const BPS_SCALE: u128 = 10_000;

impl HashCrashGenerator {
    /// Creates a generator. `house_edge_bps` is capped at 100%.
    #[must_use]
    pub fn new(house_edge_bps: u32, max_multiplier: Decimal) -> Self {
        Self {
            house_edge_bps: house_edge_bps.min(10_000),
            max_multiplier: max_multiplier.max(Decimal::ONE),
        }
    }
}

impl OutcomeGenerator for HashCrashGenerator {
    fn generate(&self, seed: &RoundSeed) -> Result<Decimal, OutcomeError> {
        let digest = seed.digest();
        let mut head = [0u8; 8];
        if let (Some(dst), Some(src)) = (head.get_mut(..), digest.get(..8)) {
            dst.copy_from_slice(src);
        }
        let r = u128::from(u64::from_be_bytes(head) >> 12);
        let e: u128 = 1 << 52;

        let numerator = (100 * e - r) * (BPS_SCALE - u128::from(self.house_edge_bps));
        let denominator = (e - r) * BPS_SCALE;
        let cents = numerator
            .checked_div(denominator)
            .ok_or_else(|| OutcomeError::Unavailable("degenerate seed".to_string()))?;
        let cents = i64::try_from(cents).unwrap_or(i64::MAX).max(100);

        Ok(Decimal::new(cents, 2).min(self.max_multiplier))
    }
}

/// Generator returning a fixed outcome, used for replays and drills.
#[derive(Debug, Clone, Copy)]
pub struct FixedOutcome(pub Decimal);

impl OutcomeGenerator for FixedOutcome {
    fn generate(&self, _seed: &RoundSeed) -> Result<Decimal, OutcomeError> {
        Ok(self.0)
    }
}
