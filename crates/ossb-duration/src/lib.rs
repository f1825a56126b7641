//! Duration parsing/serde codecs and resource-quantity parsing shared across
//! the workspace: retry-policy timings, per-build deadlines, and the
//! `resource_limits` strings accepted on a build invocation.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Deserialize a `Duration` from either a human-readable string (`"2s"`,
/// `"500ms"`) or a plain integer (milliseconds).
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        String(String),
        U64(u64),
    }

    match Helper::deserialize(deserializer)? {
        Helper::String(s) => humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration: {e}"))),
        Helper::U64(ms) => Ok(Duration::from_millis(ms)),
    }
}

/// Serialize a `Duration` as milliseconds so it round-trips with
/// [`deserialize_duration`].
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Parse a free-text duration the way [`deserialize_duration`] would,
/// for call sites that aren't going through serde (CLI flags, env vars).
pub fn parse_duration_str(s: &str) -> Result<Duration, String> {
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(s).map_err(|e| format!("invalid duration {s:?}: {e}"))
}

pub fn format_duration(d: Duration) -> String {
    humantime::format_duration(d).to_string()
}

/// A parsed `resource_limits` quantity: memory/disk (`Ki`/`Mi`/`Gi`/`Ti`
/// binary suffixes, bytes when bare) or CPU (bare cores, or millicores with
/// a trailing `m`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quantity {
    /// Smallest common unit: bytes for memory/disk, millicores for CPU.
    units: u64,
}

impl Quantity {
    pub fn bytes(&self) -> u64 {
        self.units
    }

    pub fn millicores(&self) -> u64 {
        self.units
    }

    /// Parse a memory or disk quantity string: bare digits are bytes;
    /// `Ki`/`Mi`/`Gi`/`Ti` suffixes are binary (1024-based) multipliers.
    pub fn parse_bytes(s: &str) -> Result<Self, String> {
        let s = s.trim();
        const SUFFIXES: &[(&str, u64)] = &[
            ("Ti", 1024u64.pow(4)),
            ("Gi", 1024u64.pow(3)),
            ("Mi", 1024u64.pow(2)),
            ("Ki", 1024),
        ];
        for (suffix, mult) in SUFFIXES {
            if let Some(num) = s.strip_suffix(suffix) {
                let value: f64 = num
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid quantity {s:?}"))?;
                if value < 0.0 {
                    return Err(format!("negative quantity {s:?}"));
                }
                return Ok(Self {
                    units: (value * *mult as f64) as u64,
                });
            }
        }
        let value: u64 = s.parse().map_err(|_| format!("invalid quantity {s:?}"))?;
        Ok(Self { units: value })
    }

    /// Parse a CPU quantity string: bare digits/decimals are whole cores
    /// (converted to millicores); a trailing `m` is millicores directly.
    pub fn parse_cpu(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if let Some(num) = s.strip_suffix('m') {
            let millicores: u64 = num
                .trim()
                .parse()
                .map_err(|_| format!("invalid cpu quantity {s:?}"))?;
            return Ok(Self { units: millicores });
        }
        let cores: f64 = s.parse().map_err(|_| format!("invalid cpu quantity {s:?}"))?;
        if cores < 0.0 {
            return Err(format!("negative cpu quantity {s:?}"));
        }
        Ok(Self {
            units: (cores * 1000.0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_binary_memory_suffixes() {
        assert_eq!(Quantity::parse_bytes("512Mi").unwrap().bytes(), 512 * 1024 * 1024);
        assert_eq!(Quantity::parse_bytes("1Gi").unwrap().bytes(), 1024 * 1024 * 1024);
        assert_eq!(Quantity::parse_bytes("2048").unwrap().bytes(), 2048);
    }

    #[test]
    fn parses_cpu_quantities() {
        assert_eq!(Quantity::parse_cpu("500m").unwrap().millicores(), 500);
        assert_eq!(Quantity::parse_cpu("2").unwrap().millicores(), 2000);
        assert_eq!(Quantity::parse_cpu("0.5").unwrap().millicores(), 500);
    }

    #[test]
    fn rejects_garbage_quantity() {
        assert!(Quantity::parse_bytes("not-a-number").is_err());
        assert!(Quantity::parse_cpu("not-a-number").is_err());
    }

    #[test]
    fn duration_str_accepts_plain_ms_and_humantime() {
        assert_eq!(parse_duration_str("500").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration_str("2s").unwrap(), Duration::from_secs(2));
        assert!(parse_duration_str("banana").is_err());
    }

    proptest::proptest! {
        #[test]
        fn memory_quantity_never_panics(s in "[0-9]{1,6}(Ki|Mi|Gi|Ti)?") {
            let _ = Quantity::parse_bytes(&s);
        }
    }
}
