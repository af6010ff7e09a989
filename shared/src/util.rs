/// Current UTC timestamp in milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a Snowflake-style positive i64 for use as a row ID.
///
/// Layout (53 bits):
///   - 41 bits: milliseconds since 2024-01-01 UTC
///   - 12 bits: random
pub fn snowflake_id() -> i64 {
    use rand::Rng;
    const EPOCH_MS: i64 = 1_704_067_200_000;
    let now = now_millis();
    let ts = (now - EPOCH_MS) & 0x1FF_FFFF_FFFF;
    let rand_bits: i64 = rand::thread_rng().gen_range(0..0x1000);
    (ts << 12) | rand_bits
}

/// Whether a row id belongs to an optimistic (not yet persisted) row
pub fn is_temp_id(id: i64) -> bool {
    id < 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snowflake_is_positive_and_unique_enough() {
        let a = snowflake_id();
        let b = snowflake_id();
        assert!(a > 0 && b > 0);
        assert!(!is_temp_id(a));
        assert!(is_temp_id(-1));
    }
}
