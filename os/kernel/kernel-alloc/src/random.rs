//! Random numbers for address-space layout randomization.
//!
//! [`ChaCha20Rng`] runs the ChaCha20 block function (RFC 8439 layout: four
//! constants, 256-bit key, 32-bit block counter, 96-bit nonce) and serves
//! values from a 64-byte keystream buffer. It is not a CSPRNG for secrets;
//! it only has to make virtual addresses hard to predict.

/// A stream of 64-bit random values.
pub trait RandomSource {
    fn next_u64(&mut self) -> u64;
}

impl<R: RandomSource + ?Sized> RandomSource for &mut R {
    fn next_u64(&mut self) -> u64 {
        (**self).next_u64()
    }
}

const CONSTANTS: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];
const BLOCK_BYTES: usize = 64;

/// ChaCha20 keystream generator.
#[derive(Clone)]
pub struct ChaCha20Rng {
    key: [u32; 8],
    nonce: [u32; 3],
    counter: u32,
    buffer: [u8; BLOCK_BYTES],
    position: usize,
}

#[inline]
const fn quarter_round(s: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    s[a] = s[a].wrapping_add(s[b]);
    s[d] = (s[d] ^ s[a]).rotate_left(16);
    s[c] = s[c].wrapping_add(s[d]);
    s[b] = (s[b] ^ s[c]).rotate_left(12);
    s[a] = s[a].wrapping_add(s[b]);
    s[d] = (s[d] ^ s[a]).rotate_left(8);
    s[c] = s[c].wrapping_add(s[d]);
    s[b] = (s[b] ^ s[c]).rotate_left(7);
}

/// One 64-byte keystream block.
fn block(key: &[u32; 8], nonce: &[u32; 3], counter: u32) -> [u32; 16] {
    let mut input = [0u32; 16];
    input[..4].copy_from_slice(&CONSTANTS);
    input[4..12].copy_from_slice(key);
    input[12] = counter;
    input[13..].copy_from_slice(nonce);

    let mut state = input;
    for _ in 0..10 {
        quarter_round(&mut state, 0, 4, 8, 12);
        quarter_round(&mut state, 1, 5, 9, 13);
        quarter_round(&mut state, 2, 6, 10, 14);
        quarter_round(&mut state, 3, 7, 11, 15);

        quarter_round(&mut state, 0, 5, 10, 15);
        quarter_round(&mut state, 1, 6, 11, 12);
        quarter_round(&mut state, 2, 7, 8, 13);
        quarter_round(&mut state, 3, 4, 9, 14);
    }

    for (out, word) in state.iter_mut().zip(input) {
        *out = out.wrapping_add(word);
    }
    state
}

impl ChaCha20Rng {
    #[must_use]
    pub const fn new(key: [u32; 8], nonce: [u32; 3]) -> Self {
        Self {
            key,
            nonce,
            counter: 0,
            buffer: [0; BLOCK_BYTES],
            position: BLOCK_BYTES,
        }
    }

    /// Builds a key from a handful of 64-bit seed values (timestamps,
    /// hardware random numbers, addresses). Missing words stay zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_seed(seed: &[u64]) -> Self {
        let mut words = [0u32; 11];
        for (i, value) in seed.iter().enumerate() {
            words[(2 * i) % 11] ^= *value as u32;
            words[(2 * i + 1) % 11] ^= (*value >> 32) as u32;
        }
        let mut key = [0u32; 8];
        let mut nonce = [0u32; 3];
        key.copy_from_slice(&words[..8]);
        nonce.copy_from_slice(&words[8..]);
        Self::new(key, nonce)
    }

    /// Folds `entropy` into the key, then replaces key and nonce with fresh
    /// keystream so earlier output cannot be reconstructed from the new state.
    pub fn reseed(&mut self, entropy: &[u32]) {
        for (i, word) in entropy.iter().enumerate() {
            self.key[i % 8] ^= word;
        }
        self.counter = self.counter.wrapping_add(1);
        let fresh = block(&self.key, &self.nonce, self.counter);
        self.key.copy_from_slice(&fresh[..8]);
        self.nonce.copy_from_slice(&fresh[8..11]);
        self.position = BLOCK_BYTES;
    }

    fn refill(&mut self) {
        let words = block(&self.key, &self.nonce, self.counter);
        for (chunk, word) in self.buffer.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        self.counter = self.counter.wrapping_add(1);
        self.position = 0;
    }

    /// Fills `out` with keystream bytes.
    pub fn fill_bytes(&mut self, out: &mut [u8]) {
        for byte in out {
            if self.position == BLOCK_BYTES {
                self.refill();
            }
            *byte = self.buffer[self.position];
            self.position += 1;
        }
    }
}

impl RandomSource for ChaCha20Rng {
    fn next_u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        self.fill_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }
}
