//! Chronological child keys
//!
//! Generated keys are 20 characters: 8 encode the millisecond timestamp,
//! 12 are random. The alphabet is in ASCII order, so keys sort by creation
//! time. Within one millisecond the random tail is incremented instead of
//! redrawn, keeping keys from this process strictly increasing.

use once_cell::sync::Lazy;
use rand::Rng;
use std::sync::Mutex;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Length of a generated key
pub const PUSH_KEY_LEN: usize = 20;

const TIMESTAMP_LEN: usize = 8;
const RANDOM_LEN: usize = PUSH_KEY_LEN - TIMESTAMP_LEN;

/// Key generator with its own monotonic state
#[derive(Debug, Clone)]
pub struct PushKeyGenerator {
    last_timestamp: i64,
    last_random: [u8; RANDOM_LEN],
}

impl Default for PushKeyGenerator {
    fn default() -> Self {
        Self {
            last_timestamp: i64::MIN,
            last_random: [0; RANDOM_LEN],
        }
    }
}

impl PushKeyGenerator {
    /// Generate a key for `timestamp_ms`
    pub fn next_at(&mut self, timestamp_ms: i64) -> String {
        if timestamp_ms == self.last_timestamp {
            increment(&mut self.last_random);
        } else {
            self.last_timestamp = timestamp_ms;
            let mut rng = rand::thread_rng();
            for digit in self.last_random.iter_mut() {
                *digit = rng.gen_range(0..64);
            }
        }

        let mut stamp = [0u8; TIMESTAMP_LEN];
        let mut remaining = timestamp_ms.max(0);
        for slot in stamp.iter_mut().rev() {
            *slot = PUSH_CHARS[(remaining % 64) as usize];
            remaining /= 64;
        }

        let mut key = String::with_capacity(PUSH_KEY_LEN);
        key.extend(stamp.iter().map(|&c| c as char));
        key.extend(self.last_random.iter().map(|&d| PUSH_CHARS[d as usize] as char));
        key
    }
}

static PUSH_STATE: Lazy<Mutex<PushKeyGenerator>> =
    Lazy::new(|| Mutex::new(PushKeyGenerator::default()));

/// Generate a new key for the current time
pub fn generate() -> String {
    let mut generator = match PUSH_STATE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    generator.next_at(chrono::Utc::now().timestamp_millis())
}

/// Add one to a base-64 number, carrying right to left
fn increment(digits: &mut [u8; RANDOM_LEN]) {
    for digit in digits.iter_mut().rev() {
        if *digit < 63 {
            *digit += 1;
            return;
        }
        *digit = 0;
    }
}
