use serde::{Deserialize, Serialize};

use crate::failure::FailureConfig;

/// Supported upstream provider identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderTag {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "azure-openai")]
    AzureOpenAi,
    #[serde(rename = "bedrock")]
    Bedrock,
    #[serde(rename = "vertex-ai")]
    VertexAi,
    #[serde(rename = "deepseek")]
    Deepseek,
}

impl ProviderTag {
    pub const ALL: [ProviderTag; 6] = [
        Self::OpenAi,
        Self::Anthropic,
        Self::AzureOpenAi,
        Self::Bedrock,
        Self::VertexAi,
        Self::Deepseek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::AzureOpenAi => "azure-openai",
            Self::Bedrock => "bedrock",
            Self::VertexAi => "vertex-ai",
            Self::Deepseek => "deepseek",
        }
    }
}

impl std::fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "azure-openai" | "azure_openai" | "azure" => Ok(Self::AzureOpenAi),
            "bedrock" => Ok(Self::Bedrock),
            "vertex-ai" | "vertex_ai" | "vertex" => Ok(Self::VertexAi),
            "deepseek" => Ok(Self::Deepseek),
            _ => Err(format!("unknown provider: {s}")),
        }
    }
}

/// Listener state of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    Stopped,
    Running,
    Error,
}

impl ProxyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for ProxyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(Self::Stopped),
            "running" => Ok(Self::Running),
            "error" => Ok(Self::Error),
            _ => Err(format!("unknown proxy status: {s}")),
        }
    }
}

/// One managed proxy: a provider emulation bound to a dedicated port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    pub id: i64,
    pub owner_id: String,
    pub name: String,
    pub provider: ProviderTag,
    pub port: u16,
    pub status: ProxyStatus,
    pub description: String,
    pub tags: Vec<String>,
    pub failure_config: FailureConfig,
    pub created_at: i64,
}

/// Fields accepted when creating a proxy.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProxy {
    pub name: String,
    pub provider: ProviderTag,
    pub port: Option<u16>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Fields accepted when updating a proxy. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub port: Option<u16>,
}

/// A cached upstream response, scoped to one proxy.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub proxy_id: i64,
    pub key: String,
    pub status_code: u16,
    /// Response headers with lowercased names.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_tag_round_trip() {
        for tag in ProviderTag::ALL {
            let parsed: ProviderTag = tag.as_str().parse().unwrap();
            assert_eq!(parsed, tag);
        }
        assert!("mistral".parse::<ProviderTag>().is_err());
    }

    #[test]
    fn provider_tag_serde_names() {
        let json = serde_json::to_string(&ProviderTag::AzureOpenAi).unwrap();
        assert_eq!(json, "\"azure-openai\"");
        let tag: ProviderTag = serde_json::from_str("\"vertex-ai\"").unwrap();
        assert_eq!(tag, ProviderTag::VertexAi);
    }

    #[test]
    fn status_round_trip() {
        for s in [ProxyStatus::Stopped, ProxyStatus::Running, ProxyStatus::Error] {
            assert_eq!(s.as_str().parse::<ProxyStatus>().unwrap(), s);
        }
    }
}
