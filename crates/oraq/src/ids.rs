//! Job id generation.

/// Generates a random job id: 16 random bytes rendered as lowercase hex.
///
/// Ids only need to be unique among concurrent submissions that share a
/// namespace; 128 bits of entropy makes collisions a non-concern.
pub fn random_job_id() -> String {
    let bytes: [u8; 16] = rand::random();
    let mut id = String::with_capacity(32);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(id, "{:02x}", b);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_format() {
        let id = random_job_id();
        assert_eq!(id.len(), 32);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = random_job_id();
        let b = random_job_id();
        assert_ne!(a, b);
    }
}
