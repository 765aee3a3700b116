//! Classifier configuration types and parsing helpers.
//!
//! Embedders deserialize `ClassifierConfig` from whatever carrier they
//! use, validate it, and hand the values to the application facade. The
//! parse helpers turn the human notations (`"10.0.0.0/8"`, `"80-443"`)
//! into domain values.

use serde::{Deserialize, Serialize};

use domain::rule::entity::{IpPrefix, PortRange};

// ── Security limits ────────────────────────────────────────────────

/// Maximum classifier rules accepted from configuration.
pub const MAX_RULES: usize = 65_536;

// ── Config errors ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("invalid CIDR notation '{value}': {reason}")]
    InvalidCidr { value: String, reason: String },

    #[error("invalid port range '{value}': {reason}")]
    InvalidPortRange { value: String, reason: String },
}

// ── Classifier config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Run the negative prefilter in front of lookups.
    #[serde(default = "default_true")]
    pub enable_prefilter: bool,

    /// Expected live rule count (prefilter sizing).
    #[serde(default = "default_expected_rules")]
    pub expected_rule_count: u32,

    /// Prefilter false-positive target, exclusive (0, 1).
    #[serde(default = "default_fp_rate")]
    pub target_false_positive: f64,

    /// Hard cap on live rules.
    #[serde(default = "default_max_rules")]
    pub max_rules: usize,

    /// Rule removals tolerated before a prefilter rebuild.
    #[serde(default = "default_rebuild_removals")]
    pub prefilter_rebuild_removals: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enable_prefilter: true,
            expected_rule_count: default_expected_rules(),
            target_false_positive: default_fp_rate(),
            max_rules: default_max_rules(),
            prefilter_rebuild_removals: default_rebuild_removals(),
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_false_positive <= 0.0 || self.target_false_positive >= 1.0 {
            return Err(ConfigError::Validation {
                field: "target_false_positive".to_string(),
                message: format!(
                    "{} is outside (0, 1)",
                    self.target_false_positive
                ),
            });
        }
        if self.max_rules == 0 {
            return Err(ConfigError::Validation {
                field: "max_rules".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_rules > MAX_RULES {
            return Err(ConfigError::Validation {
                field: "max_rules".to_string(),
                message: format!("{} exceeds the limit of {MAX_RULES}", self.max_rules),
            });
        }
        if self.expected_rule_count == 0 {
            return Err(ConfigError::Validation {
                field: "expected_rule_count".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_expected_rules() -> u32 {
    4096
}

fn default_fp_rate() -> f64 {
    0.01
}

fn default_max_rules() -> usize {
    4096
}

fn default_rebuild_removals() -> u32 {
    256
}

// ── Parsing helpers ────────────────────────────────────────────────

/// Parse an IPv4 CIDR string like `"192.168.1.0/24"` or `"10.0.0.1"`
/// (no slash means a host route). The address is normalized onto the
/// prefix, so `"10.1.2.3/8"` becomes `10.0.0.0/8`.
pub fn parse_cidr(s: &str) -> Result<IpPrefix, ConfigError> {
    let (ip_str, len) = match s.split_once('/') {
        Some((ip, suffix)) => {
            let len = suffix.parse::<u8>().map_err(|_| ConfigError::InvalidCidr {
                value: s.to_string(),
                reason: format!("prefix length '{suffix}' is not a number"),
            })?;
            if len > 32 {
                return Err(ConfigError::InvalidCidr {
                    value: s.to_string(),
                    reason: format!("prefix length {len} exceeds 32"),
                });
            }
            (ip, len)
        }
        None => (s, 32),
    };

    let octets: Vec<&str> = ip_str.split('.').collect();
    if octets.len() != 4 {
        return Err(ConfigError::InvalidCidr {
            value: s.to_string(),
            reason: format!("{} dotted parts instead of 4", octets.len()),
        });
    }
    let mut addr = 0u32;
    for octet in octets {
        let n = octet.parse::<u8>().map_err(|_| ConfigError::InvalidCidr {
            value: s.to_string(),
            reason: format!("octet '{octet}' is not in 0-255"),
        })?;
        addr = (addr << 8) | u32::from(n);
    }

    let prefix = IpPrefix { addr, len };
    let normalized = IpPrefix {
        addr: addr & prefix.mask(),
        len,
    };
    Ok(normalized)
}

/// Parse a port range like `"80"`, `"80-443"`, or `"any"`.
pub fn parse_port_range(s: &str) -> Result<PortRange, ConfigError> {
    if s.eq_ignore_ascii_case("any") {
        return Ok(PortRange::ANY);
    }
    let parse_port = |part: &str| {
        part.parse::<u16>().map_err(|_| ConfigError::InvalidPortRange {
            value: s.to_string(),
            reason: format!("invalid port: '{part}'"),
        })
    };
    let range = match s.split_once('-') {
        Some((low, high)) => PortRange {
            start: parse_port(low.trim())?,
            end: parse_port(high.trim())?,
        },
        None => {
            let port = parse_port(s.trim())?;
            PortRange { start: port, end: port }
        }
    };
    if range.start > range.end {
        return Err(ConfigError::InvalidPortRange {
            value: s.to_string(),
            reason: format!("{} is greater than {}", range.start, range.end),
        });
    }
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Config validation ─────────────────────────────────────────

    #[test]
    fn default_config_is_valid() {
        assert!(ClassifierConfig::default().validate().is_ok());
    }

    #[test]
    fn fp_rate_bounds_are_enforced() {
        let mut config = ClassifierConfig::default();
        config.target_false_positive = 0.0;
        assert!(config.validate().is_err());
        config.target_false_positive = 1.0;
        assert!(config.validate().is_err());
        config.target_false_positive = 0.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rule_limits_are_enforced() {
        let mut config = ClassifierConfig::default();
        config.max_rules = 0;
        assert!(config.validate().is_err());
        config.max_rules = MAX_RULES + 1;
        assert!(config.validate().is_err());
        config.max_rules = MAX_RULES;
        assert!(config.validate().is_ok());

        config.expected_rule_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ClassifierConfig = serde_json::from_str("{}").unwrap();
        assert!(config.enable_prefilter);
        assert_eq!(config.expected_rule_count, 4096);
        assert_eq!(config.max_rules, 4096);

        let config: ClassifierConfig =
            serde_json::from_str(r#"{"enable_prefilter": false, "max_rules": 128}"#).unwrap();
        assert!(!config.enable_prefilter);
        assert_eq!(config.max_rules, 128);
        assert_eq!(config.prefilter_rebuild_removals, 256);
    }

    // ── parse_cidr ────────────────────────────────────────────────

    #[test]
    fn parse_cidr_subnet() {
        let prefix = parse_cidr("192.168.1.0/24").unwrap();
        assert_eq!(prefix, IpPrefix::new(0xC0A8_0100, 24).unwrap());
    }

    #[test]
    fn parse_cidr_host_without_slash() {
        let prefix = parse_cidr("10.0.0.1").unwrap();
        assert_eq!(prefix, IpPrefix::new(0x0A00_0001, 32).unwrap());
    }

    #[test]
    fn parse_cidr_normalizes_host_bits() {
        let prefix = parse_cidr("10.1.2.3/8").unwrap();
        assert_eq!(prefix, IpPrefix::new(0x0A00_0000, 8).unwrap());
    }

    #[test]
    fn parse_cidr_default_route() {
        let prefix = parse_cidr("0.0.0.0/0").unwrap();
        assert_eq!(prefix, IpPrefix::ANY);
    }

    #[test]
    fn parse_cidr_rejects_garbage() {
        assert!(parse_cidr("10.0.0/8").is_err());
        assert!(parse_cidr("10.0.0.256/8").is_err());
        assert!(parse_cidr("10.0.0.0/33").is_err());
        assert!(parse_cidr("10.0.0.0/x").is_err());
        assert!(parse_cidr("").is_err());
    }

    // ── parse_port_range ──────────────────────────────────────────

    #[test]
    fn parse_port_range_forms() {
        assert_eq!(
            parse_port_range("80").unwrap(),
            PortRange { start: 80, end: 80 }
        );
        assert_eq!(
            parse_port_range("80-443").unwrap(),
            PortRange { start: 80, end: 443 }
        );
        assert_eq!(parse_port_range("any").unwrap(), PortRange::ANY);
        assert_eq!(parse_port_range("ANY").unwrap(), PortRange::ANY);
    }

    #[test]
    fn parse_port_range_rejects_garbage() {
        assert!(parse_port_range("").is_err());
        assert!(parse_port_range("80-").is_err());
        assert!(parse_port_range("-80").is_err());
        assert!(parse_port_range("443-80").is_err());
        assert!(parse_port_range("65536").is_err());
        assert!(parse_port_range("a-b").is_err());
    }
}
