//! `dlkit checksum <path> [--expect <digest>]` — hash a file, optionally
//! verifying it against a published digest.

use std::path::Path;

use anyhow::{bail, Result};
use dlkit_core::checksum::{self, VerifyOutcome};

pub async fn run_checksum(path: &Path, expect: Option<String>) -> Result<()> {
    let Some(expected) = expect else {
        let digest = checksum::sha256_path(path)?;
        println!("{digest}  {}", path.display());
        return Ok(());
    };

    match checksum::verify(path, &expected)? {
        VerifyOutcome::Match { digest } => {
            println!("OK  {digest}  {}", path.display());
            Ok(())
        }
        VerifyOutcome::Mismatch { expected, actual } => {
            bail!("checksum mismatch for {}: expected {expected}, got {actual}", path.display());
        }
    }
}
