use crate::error::FilterError;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// A 48-bit hardware address. Always rendered in canonical form:
/// uppercase, colon separated (`AA:BB:CC:DD:EE:FF`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress {
    bytes: [u8; 6],
}

/// Notations accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MacFormat {
    Colon,  // 00:11:22:33:44:55
    Hyphen, // 00-11-22-33-44-55
    Dot,    // 0011.2233.4455
    Plain,  // 001122334455
}

static RE_COLON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("valid regex"));
static RE_HYPHEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9A-Fa-f]{2}-){5}[0-9A-Fa-f]{2}$").expect("valid regex"));
static RE_DOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{4}\.[0-9A-Fa-f]{4}\.[0-9A-Fa-f]{4}$").expect("valid regex")
});
static RE_PLAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f]{12}$").expect("valid regex"));

impl MacFormat {
    fn detect(s: &str) -> Option<Self> {
        if RE_COLON.is_match(s) {
            Some(MacFormat::Colon)
        } else if RE_HYPHEN.is_match(s) {
            Some(MacFormat::Hyphen)
        } else if RE_DOT.is_match(s) {
            Some(MacFormat::Dot)
        } else if RE_PLAIN.is_match(s) {
            Some(MacFormat::Plain)
        } else {
            None
        }
    }
}

impl MacAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.bytes
    }
}

impl FromStr for MacAddress {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if MacFormat::detect(trimmed).is_none() {
            return Err(FilterError::InvalidMac(s.to_string()));
        }

        let digits: String = trimmed.chars().filter(char::is_ascii_hexdigit).collect();
        let decoded = hex::decode(&digits).map_err(|_| FilterError::InvalidMac(s.to_string()))?;
        let bytes: [u8; 6] = decoded
            .try_into()
            .map_err(|_| FilterError::InvalidMac(s.to_string()))?;

        Ok(MacAddress { bytes })
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Parses any accepted notation and returns the canonical string.
pub fn canonicalize(input: &str) -> Result<String, FilterError> {
    input.parse::<MacAddress>().map(|mac| mac.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hyphen_lowercase_is_canonicalized() {
        assert_eq!(canonicalize("aa-bb-cc-dd-ee-ff").unwrap(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_all_notations_agree() {
        let expected = "00:1A:2B:3C:4D:5E";
        for input in [
            "00:1a:2b:3c:4d:5e",
            "00-1A-2B-3C-4D-5E",
            "001a.2b3c.4d5e",
            "001A2B3C4D5E",
            "  00:1a:2b:3c:4d:5e\n",
        ] {
            assert_eq!(canonicalize(input).unwrap(), expected, "input {input:?}");
        }
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(MacFormat::detect("00:11:22:33:44:55"), Some(MacFormat::Colon));
        assert_eq!(MacFormat::detect("00-11-22-33-44-55"), Some(MacFormat::Hyphen));
        assert_eq!(MacFormat::detect("0011.2233.4455"), Some(MacFormat::Dot));
        assert_eq!(MacFormat::detect("001122334455"), Some(MacFormat::Plain));
        assert_eq!(MacFormat::detect("00:11-22:33:44:55"), None);
    }

    #[test]
    fn test_rejects_bad_input() {
        for input in [
            "",
            "00:11:22:33:44",
            "00:11:22:33:44:55:66",
            "GG:11:22:33:44:55",
            "0:11:22:33:44:55",
            "00:11:22:33:44:5",
            "00112233445",
            "not a mac",
        ] {
            assert!(
                matches!(input.parse::<MacAddress>(), Err(FilterError::InvalidMac(_))),
                "accepted {input:?}"
            );
        }
    }

    #[test]
    fn test_ordering_matches_canonical_text() {
        let a: MacAddress = "0A:00:00:00:00:00".parse().unwrap();
        let b: MacAddress = "A0:00:00:00:00:00".parse().unwrap();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_canonicalize_is_idempotent(bytes in any::<[u8; 6]>()) {
            let once = MacAddress::new(bytes).to_string();
            let twice = canonicalize(&once).unwrap();
            prop_assert_eq!(&once, &twice);
        }

        #[test]
        fn test_case_and_delimiter_insensitive(bytes in any::<[u8; 6]>(), upper in any::<bool>()) {
            let hyphen = bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join("-");
            let hyphen = if upper { hyphen.to_uppercase() } else { hyphen };
            let parsed: MacAddress = hyphen.parse().unwrap();
            prop_assert_eq!(parsed.bytes(), bytes);
            prop_assert_eq!(parsed.to_string(), MacAddress::new(bytes).to_string());
        }

        #[test]
        fn test_arbitrary_text_never_panics(input in "\\PC*") {
            let _ = input.parse::<MacAddress>();
        }
    }
}
