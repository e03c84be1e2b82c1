//! License key generation.
//!
//! Keys look like `AXCTL-PRO-cus_ABC123xyz-9f8e7d6c`: a fixed product prefix,
//! the billing customer id, and a random hex suffix so keys cannot be guessed
//! or enumerated. Uniqueness is enforced by the `licenses.license_key` UNIQUE
//! constraint; on the astronomically rare collision the engine regenerates
//! and retries rather than overwriting.

use rand::Rng;

/// Random suffix length in hex characters (4 bytes = 32 bits of entropy).
const SUFFIX_HEX_CHARS: usize = 8;

pub fn generate_license_key(prefix: &str, customer_id: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; SUFFIX_HEX_CHARS / 2];
    rng.fill(&mut bytes);
    format!("{}-{}-{}", prefix, customer_id, hex::encode(bytes))
}
