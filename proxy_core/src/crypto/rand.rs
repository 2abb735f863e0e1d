//! CSPRNG access for session keys, IVs and padding, backed by `rand`'s
//! OS-seeded generator.

use rand::RngCore;
use std::io;

/// Fill `buf` with cryptographically secure random bytes.
pub fn fill_random(buf: &mut [u8]) -> io::Result<()> {
    rand::rngs::OsRng.fill_bytes(buf);
    Ok(())
}

/// Return a random `u64`.
pub fn random_u64() -> u64 {
    rand::rngs::OsRng.next_u64()
}
