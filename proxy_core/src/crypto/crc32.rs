//! CRC-32/IEEE, used for the VMESS `auth_id` block's anti-tamper checksum —
//! not for integrity of anything security-sensitive.

/// Compute the IEEE CRC-32 checksum of `data`.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(crc32_ieee(b""), 0);
        assert_eq!(crc32_ieee(b"123456789"), 0xcbf43926);
    }
}
