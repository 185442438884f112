use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-proxy failure simulation settings, persisted as a JSON blob on the
/// proxy row. A freshly created proxy gets the all-disabled default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureConfig {
    pub timeout_enabled: bool,
    /// Probability in [0,1] that a request is hit by timeout injection.
    pub timeout_rate: f64,
    /// Seconds to stall before answering 504. `None` hangs until the client
    /// disconnects.
    pub timeout_seconds: Option<f64>,

    pub error_injection_enabled: bool,
    /// Independent injection probability per HTTP status code. A BTreeMap so
    /// injection draws iterate in ascending status-code order.
    pub error_rates: BTreeMap<u16, f64>,

    pub rate_limiting_enabled: bool,
    pub requests_per_minute: u32,

    pub ip_filtering_enabled: bool,
    /// Entries are exact IPs, CIDR blocks, or glob patterns (`*`, `?`).
    pub ip_allowlist: Vec<String>,
    pub ip_blocklist: Vec<String>,

    pub response_delay_enabled: bool,
    pub response_delay_min_seconds: f64,
    pub response_delay_max_seconds: f64,
    /// When true, only cache hits are delayed.
    pub response_delay_cache_only: bool,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            timeout_enabled: false,
            timeout_rate: 0.0,
            timeout_seconds: Some(30.0),
            error_injection_enabled: false,
            error_rates: BTreeMap::new(),
            rate_limiting_enabled: false,
            requests_per_minute: 60,
            ip_filtering_enabled: false,
            ip_allowlist: Vec::new(),
            ip_blocklist: Vec::new(),
            response_delay_enabled: false,
            response_delay_min_seconds: 0.0,
            response_delay_max_seconds: 0.0,
            response_delay_cache_only: false,
        }
    }
}

const MAX_RESPONSE_DELAY_SECONDS: f64 = 30.0;

impl FailureConfig {
    /// Validate the invariants enforced on every failure-config PUT.
    /// Returns the list of offending fields.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !(0.0..=1.0).contains(&self.timeout_rate) {
            errors.push("timeout_rate must be within [0, 1]".to_string());
        }
        if let Some(secs) = self.timeout_seconds
            && !(secs > 0.0 && secs.is_finite())
        {
            errors.push("timeout_seconds must be positive and finite, or null".to_string());
        }

        for (code, rate) in &self.error_rates {
            if !(100..=599).contains(code) {
                errors.push(format!("error_rates: status code {code} outside [100, 599]"));
            }
            if !(0.0..=1.0).contains(rate) {
                errors.push(format!("error_rates[{code}] must be within [0, 1]"));
            }
        }

        if self.requests_per_minute < 1 {
            errors.push("requests_per_minute must be >= 1".to_string());
        }

        for entry in self.ip_allowlist.iter().chain(self.ip_blocklist.iter()) {
            if entry.trim().is_empty() {
                errors.push("ip list entries must not be empty".to_string());
            } else if entry.contains('/') && entry.parse::<ipnet::IpNet>().is_err() {
                errors.push(format!("invalid CIDR entry: {entry}"));
            }
        }

        if self.response_delay_min_seconds < 0.0 {
            errors.push("response_delay_min_seconds must be >= 0".to_string());
        }
        if self.response_delay_max_seconds < self.response_delay_min_seconds {
            errors.push("response_delay_max_seconds must be >= response_delay_min_seconds".to_string());
        }
        if self.response_delay_max_seconds > MAX_RESPONSE_DELAY_SECONDS {
            errors.push(format!(
                "response_delay_max_seconds must be <= {MAX_RESPONSE_DELAY_SECONDS}"
            ));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// What, if anything, the simulator did to a request. Recorded on every log
/// entry; exactly one value per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    None,
    Timeout,
    InjectedError(u16),
    RateLimited,
    IpBlocked,
    UpstreamError,
}

impl FailureType {
    pub fn render(&self) -> String {
        match self {
            Self::None => "none".to_string(),
            Self::Timeout => "timeout".to_string(),
            Self::InjectedError(code) => format!("injected_error_{code}"),
            Self::RateLimited => "rate_limited".to_string(),
            Self::IpBlocked => "ip_blocked".to_string(),
            Self::UpstreamError => "upstream_error".to_string(),
        }
    }
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

impl std::str::FromStr for FailureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "timeout" => Ok(Self::Timeout),
            "rate_limited" => Ok(Self::RateLimited),
            "ip_blocked" => Ok(Self::IpBlocked),
            "upstream_error" => Ok(Self::UpstreamError),
            other => {
                if let Some(code) = other.strip_prefix("injected_error_") {
                    code.parse::<u16>()
                        .map(Self::InjectedError)
                        .map_err(|_| format!("unknown failure type: {other}"))
                } else {
                    Err(format!("unknown failure type: {other}"))
                }
            }
        }
    }
}

impl serde::Serialize for FailureType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

impl<'de> serde::Deserialize<'de> for FailureType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_all_disabled() {
        let cfg = FailureConfig::default();
        assert!(!cfg.timeout_enabled);
        assert!(!cfg.error_injection_enabled);
        assert!(!cfg.rate_limiting_enabled);
        assert!(!cfg.ip_filtering_enabled);
        assert!(!cfg.response_delay_enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_rates() {
        let cfg = FailureConfig {
            timeout_rate: 1.5,
            ..Default::default()
        };
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("timeout_rate")));
    }

    #[test]
    fn validate_rejects_bad_error_rates() {
        let mut cfg = FailureConfig::default();
        cfg.error_rates.insert(99, 0.5);
        cfg.error_rates.insert(429, 2.0);
        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn validate_rejects_inverted_delay_bounds() {
        let cfg = FailureConfig {
            response_delay_min_seconds: 2.0,
            response_delay_max_seconds: 1.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = FailureConfig {
            response_delay_min_seconds: 1.0,
            response_delay_max_seconds: 31.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_cidr() {
        let cfg = FailureConfig {
            ip_blocklist: vec!["10.0.0.0/40".to_string()],
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = FailureConfig {
            ip_blocklist: vec!["10.0.0.0/8".to_string(), "192.168.1.*".to_string()],
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn error_rates_deserialize_with_string_keys() {
        let cfg: FailureConfig =
            serde_json::from_str(r#"{"error_injection_enabled":true,"error_rates":{"429":1.0,"500":0.5}}"#)
                .unwrap();
        let codes: Vec<u16> = cfg.error_rates.keys().copied().collect();
        assert_eq!(codes, vec![429, 500]);
    }

    #[test]
    fn failure_type_round_trip() {
        for ft in [
            FailureType::None,
            FailureType::Timeout,
            FailureType::InjectedError(503),
            FailureType::RateLimited,
            FailureType::IpBlocked,
            FailureType::UpstreamError,
        ] {
            assert_eq!(ft.render().parse::<FailureType>().unwrap(), ft);
        }
    }
}
