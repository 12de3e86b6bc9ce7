//! Linear congruential generator shared by every participant.
//!
//! Nib shapes are never sent over the wire, so this stream has to match
//! bit-for-bit across implementations: 32-bit wraparound, state masked to 31
//! bits after each step, 15 bits taken from each of two steps per draw.

pub const LCG_MULTIPLIER: u32 = 214_013;
pub const LCG_INCREMENT: u32 = 2_531_011;
pub const DEFAULT_SEED: u32 = 123_456_789;

const STATE_MASK: u32 = 0x7fff_ffff;
const UNIT_SCALE: f64 = (1u32 << 30) as f64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    pub fn new(seed: u32) -> Self {
        let mut rng = Self {
            state: DEFAULT_SEED,
        };
        rng.seed(seed);
        rng
    }

    /// Resets the state and throws away two draws so small seeds don't leak
    /// into the first real output.
    pub fn seed(&mut self, value: u32) {
        self.state = value;
        self.next_raw();
        self.next_raw();
    }

    pub fn state(&self) -> u32 {
        self.state
    }

    fn step(&mut self) -> u32 {
        self.state = LCG_MULTIPLIER
            .wrapping_mul(self.state)
            .wrapping_add(LCG_INCREMENT)
            & STATE_MASK;
        self.state >> 16
    }

    /// 30-bit draw, the integer behind [`Lcg::next_f64`].
    pub fn next_raw(&mut self) -> u32 {
        let hi = self.step();
        let lo = self.step();
        (hi << 15) | lo
    }

    pub fn next_f64(&mut self) -> f64 {
        f64::from(self.next_raw()) / UNIT_SCALE
    }

    /// Fair coin from one draw: `floor(next() * 2) != 0`.
    pub fn next_bool(&mut self) -> bool {
        (self.next_f64() * 2.0).floor() != 0.0
    }

    /// Uniform index in `0..len` (`len` must be non-zero).
    pub fn next_index(&mut self, len: usize) -> usize {
        let idx = (self.next_f64() * len as f64).floor() as usize;
        idx.min(len.saturating_sub(1))
    }
}

impl Default for Lcg {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}
