//! Per-Match Random Number Generator
//!
//! Every match owns its own Xorshift128+ generator. Nothing in the
//! rules engine touches a process-wide random source, so a match can be
//! replayed from its seed.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Seedable Xorshift128+ generator.
///
/// ```
/// use fazbear::core::rng::MatchRng;
///
/// let mut a = MatchRng::new(7);
/// let mut b = MatchRng::new(7);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchRng {
    state: [u64; 2],
}

impl Default for MatchRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl MatchRng {
    /// Create a generator from a 64-bit seed.
    ///
    /// The seed is spread with SplitMix64 so that small or sequential
    /// seeds still produce unrelated streams.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let a = splitmix64(&mut s);
        let b = splitmix64(&mut s);

        // All-zero state would make the generator emit zeros forever
        let state = if a == 0 && b == 0 { [1, 1] } else { [a, b] };

        Self { state }
    }

    /// Next raw 64-bit value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Uniform integer in `[0, max)`. Returns 0 when `max` is 0.
    #[inline]
    pub fn next_below(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        (self.next_u64() % max as u64) as u32
    }

    /// Uniform integer in `[min, max]` (inclusive on both ends).
    #[inline]
    pub fn next_in_range(&mut self, min: u32, max: u32) -> u32 {
        if min >= max {
            return min;
        }
        min + self.next_below(max - min + 1)
    }

    /// Roll a twenty-sided die: `1..=20`.
    #[inline]
    pub fn roll_d20(&mut self) -> u32 {
        self.next_in_range(1, 20)
    }

    /// True with probability `1 / n`.
    #[inline]
    pub fn one_in(&mut self, n: u32) -> bool {
        n <= 1 || self.next_below(n) == 0
    }

    /// Pick a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_below(slice.len() as u32) as usize;
            Some(&slice[idx])
        }
    }
}

#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive the seed for a new match.
///
/// `entropy` comes from the caller (wall clock in production, a constant
/// in tests). Lobby name and member ids are mixed in so two lobbies
/// starting in the same instant still diverge. `member_ids` must be in
/// a stable order; the lobby passes them sorted.
pub fn derive_match_seed(entropy: u64, lobby_name: &str, member_ids: &[[u8; 16]]) -> u64 {
    let mut hasher = Sha256::new();

    hasher.update(b"FAZBEAR_MATCH_SEED_V1");
    hasher.update(entropy.to_le_bytes());
    hasher.update((lobby_name.len() as u32).to_le_bytes());
    hasher.update(lobby_name.as_bytes());
    for id in member_ids {
        hasher.update(id);
    }

    let hash = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(seed)
}
