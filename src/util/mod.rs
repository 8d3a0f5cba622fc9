pub mod env;
pub mod telemetry;
pub mod tracing;

/// Performs `&str` comparisons in constant time so the admin-gate check cannot
/// leak prefix information about the shared secret through timing.
pub fn constant_time_cmp(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut res = 0u8;

    // every byte pair passes through black_box so the fold cannot be
    // short-circuited out from under us
    for (left, right) in a.bytes().zip(b.bytes()) {
        res |= std::hint::black_box(left) ^ std::hint::black_box(right);
    }

    res == 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_const_time_cmp() {
        let expects = "roster_secret";
        let passing = "roster_secret";

        let bad_start = "__ster_secret";
        let bad_end = "roster_sec___";

        let short = "roster_secre";
        let long = "roster_secret_";

        assert!(constant_time_cmp(expects, passing));
        assert!(!constant_time_cmp(expects, bad_start));
        assert!(!constant_time_cmp(expects, bad_end));
        assert!(!constant_time_cmp(expects, short));
        assert!(!constant_time_cmp(expects, long));
    }
}
