//! Task-id generation for `dlkit add`. The engine treats `TaskId` as an
//! opaque string; the CLI is the only thing that has to mint new ones.

use std::sync::atomic::{AtomicU32, Ordering};

use dlkit_core::model::now_epoch_secs;

static COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn generate() -> String {
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", now_epoch_secs(), seq)
}
