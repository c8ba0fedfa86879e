//! Cooperative byte-rate throttling (C2: TokenBucket / SpeedLimiter).
//!
//! Mirrors the synchronous "reserve units, block until available" shape
//! already used for the global connection budget, but accounts for a
//! continuously-refilling rate rather than a fixed slot count.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A parsed speed limit: either unbounded, or a rate in bytes/sec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedLimit {
    Unlimited,
    BytesPerSec(u64),
}

impl SpeedLimit {
    pub fn bytes_per_sec(self) -> Option<u64> {
        match self {
            SpeedLimit::Unlimited => None,
            SpeedLimit::BytesPerSec(n) => Some(n),
        }
    }

    pub fn new_limiter(self) -> TokenBucket {
        match self {
            SpeedLimit::Unlimited => TokenBucket::unlimited(),
            SpeedLimit::BytesPerSec(r) => TokenBucket::limited(r),
        }
    }
}

impl fmt::Display for SpeedLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeedLimit::Unlimited => write!(f, "unlimited"),
            SpeedLimit::BytesPerSec(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for SpeedLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(SpeedLimit::Unlimited);
        }
        let lower = s.to_ascii_lowercase();
        if let Some(num) = lower.strip_suffix('k') {
            let n: f64 = num.parse().map_err(|_| format!("invalid speed limit: {s}"))?;
            return Ok(SpeedLimit::BytesPerSec((n * 1024.0) as u64));
        }
        if let Some(num) = lower.strip_suffix('m') {
            let n: f64 = num.parse().map_err(|_| format!("invalid speed limit: {s}"))?;
            return Ok(SpeedLimit::BytesPerSec((n * 1024.0 * 1024.0) as u64));
        }
        let n: u64 = lower.parse().map_err(|_| format!("invalid speed limit: {s}"))?;
        Ok(SpeedLimit::BytesPerSec(n))
    }
}

impl Serialize for SpeedLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SpeedLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SpeedLimit::from_str(&s).map_err(serde::de::Error::custom)
    }
}

struct RefillState {
    tokens: f64,
    last_refill: Instant,
}

/// `Unlimited` is a no-op `acquire`; `Limited` suspends until `n` tokens are
/// available, then deducts them. Capacity equals one second's worth of
/// tokens so short bursts are allowed. Rate changes from `set_rate` take
/// effect on the next refill without dropping already-granted tokens.
pub struct TokenBucket {
    /// 0 means unlimited.
    rate: AtomicU64,
    state: Mutex<RefillState>,
}

impl TokenBucket {
    pub fn unlimited() -> Self {
        Self {
            rate: AtomicU64::new(0),
            state: Mutex::new(RefillState {
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn limited(rate_per_sec: u64) -> Self {
        Self {
            rate: AtomicU64::new(rate_per_sec.max(1)),
            state: Mutex::new(RefillState {
                tokens: rate_per_sec as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn set_rate(&self, rate_per_sec: u64) {
        self.rate.store(rate_per_sec, Ordering::Relaxed);
    }

    fn rate(&self) -> u64 {
        self.rate.load(Ordering::Relaxed)
    }

    /// Blocks the calling (blocking-pool) thread until `n` tokens are
    /// available, then deducts them.
    pub fn acquire(&self, n: u64) {
        let rate = self.rate();
        if rate == 0 {
            return;
        }
        let capacity = rate as f64;
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * rate as f64).min(capacity);
                state.last_refill = now;

                if state.tokens >= n as f64 {
                    state.tokens -= n as f64;
                    None
                } else {
                    let deficit = n as f64 - state.tokens;
                    Some(Duration::from_secs_f64((deficit / rate as f64).max(0.001)))
                }
            };
            match wait {
                None => return,
                Some(d) => std::thread::sleep(d),
            }
        }
    }
}

/// Sequences a chunk of `len` bytes through the per-task limiter, then the
/// shared global limiter, as required by the composition rule in 4.2.
pub fn acquire_chained(per_task: &TokenBucket, global: &TokenBucket, len: u64) {
    per_task.acquire(len);
    global.acquire(len);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_never_blocks() {
        let bucket = TokenBucket::unlimited();
        let start = Instant::now();
        bucket.acquire(10_000_000);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn limited_allows_initial_burst_up_to_capacity() {
        let bucket = TokenBucket::limited(1000);
        let start = Instant::now();
        bucket.acquire(1000);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn limited_blocks_past_capacity() {
        let bucket = TokenBucket::limited(1000);
        let start = Instant::now();
        bucket.acquire(1000);
        bucket.acquire(100);
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn set_rate_does_not_drop_existing_tokens() {
        let bucket = TokenBucket::limited(10);
        bucket.set_rate(1_000_000);
        let start = Instant::now();
        bucket.acquire(10);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn speed_limit_parsing() {
        assert_eq!("unlimited".parse::<SpeedLimit>().unwrap(), SpeedLimit::Unlimited);
        assert_eq!("500k".parse::<SpeedLimit>().unwrap(), SpeedLimit::BytesPerSec(512_000));
        assert_eq!("10m".parse::<SpeedLimit>().unwrap(), SpeedLimit::BytesPerSec(10_485_760));
        assert_eq!("1234".parse::<SpeedLimit>().unwrap(), SpeedLimit::BytesPerSec(1234));
    }

    #[test]
    fn speed_limit_json_roundtrip() {
        let limit = SpeedLimit::BytesPerSec(512_000);
        let json = serde_json::to_string(&limit).unwrap();
        let parsed: SpeedLimit = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, limit);
    }
}
