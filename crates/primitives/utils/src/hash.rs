use std::fmt;

/// Shortened display of a hash: first and last four hex digits.
///
/// Used by the sync progress logs, where full hashes would drown the line.
pub fn trim_hash(hash: &impl fmt::LowerHex) -> String {
    let hash_str = format!("{hash:#x}");
    let hex = hash_str.trim_start_matches("0x").trim_start_matches('0');

    if hex.len() <= 8 {
        format!("0x{hex}")
    } else {
        let (start, end) = (&hex[..4], &hex[hex.len() - 4..]);
        format!("0x{start}...{end}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hex(u128);
    impl fmt::LowerHex for Hex {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            fmt::LowerHex::fmt(&self.0, f)
        }
    }

    #[test]
    fn trims_long_hashes() {
        assert_eq!(trim_hash(&Hex(0xdeadbeef_01234567_89abcdef_55667788)), "0xdead...7788");
    }

    #[test]
    fn keeps_short_hashes() {
        assert_eq!(trim_hash(&Hex(0x1234)), "0x1234");
        assert_eq!(trim_hash(&Hex(0)), "0x");
    }
}
