//! TOML-based configuration for ONE-NET nodes.

use std::path::Path;

use serde::Deserialize;

use crate::error::NodeError;
use crate::invite::InviteCode;

/// Top-level node configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("failed to read config file: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(format!("failed to parse config: {e}")))
    }
}

/// Which role this device plays in its network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Client,
}

/// The `[device]` section.
#[derive(Debug, Deserialize)]
pub struct DeviceSection {
    #[serde(default = "default_role")]
    pub role: Role,
    /// Channel to operate on (masters) or start scanning from (clients).
    #[serde(default)]
    pub channel: u8,
    #[serde(default)]
    pub data_rate: u8,
    /// Custom state directory path. Defaults to `~/.onenet/state`.
    pub state_path: Option<String>,
    /// Reject out-of-window message IDs. Default: true.
    #[serde(default = "default_strict_msg_id")]
    pub strict_msg_id: bool,
    /// Invite code to join with (clients) or hand out (masters).
    pub invite_code: Option<String>,
}

impl DeviceSection {
    /// Validate the configured invite code, if any.
    pub fn invite_code(&self) -> Result<Option<InviteCode>, NodeError> {
        self.invite_code.as_deref().map(InviteCode::new).transpose()
    }
}

fn default_role() -> Role {
    Role::Client
}

fn default_strict_msg_id() -> bool {
    true
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            role: default_role(),
            channel: 0,
            data_rate: 0,
            state_path: None,
            strict_msg_id: default_strict_msg_id(),
            invite_code: None,
        }
    }
}

/// The `[network]` section. Only meaningful for masters; clients learn
/// these values from their invite.
#[derive(Debug, Deserialize)]
pub struct NetworkSection {
    /// 36-bit network ID as a hex string, e.g. `"2a13f7890"`.
    pub nid: Option<String>,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Keep-alive interval pushed to joining clients, in ms.
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u32,
    /// Delay between block/stream data packets for low priority, in ms.
    #[serde(default = "default_low_frag_delay_ms")]
    pub low_frag_delay_ms: u16,
    /// Delay between block/stream data packets for high priority, in ms.
    #[serde(default = "default_high_frag_delay_ms")]
    pub high_frag_delay_ms: u16,
    /// Per-chunk response deadline for block and stream sessions, in ms.
    #[serde(default = "default_bs_timeout_ms")]
    pub bs_timeout_ms: u16,
}

fn default_max_clients() -> usize {
    16
}

fn default_keep_alive_ms() -> u32 {
    1_800_000
}

fn default_low_frag_delay_ms() -> u16 {
    50
}

fn default_high_frag_delay_ms() -> u16 {
    25
}

fn default_bs_timeout_ms() -> u16 {
    3000
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            nid: None,
            max_clients: default_max_clients(),
            keep_alive_ms: default_keep_alive_ms(),
            low_frag_delay_ms: default_low_frag_delay_ms(),
            high_frag_delay_ms: default_high_frag_delay_ms(),
            bs_timeout_ms: default_bs_timeout_ms(),
        }
    }
}

impl NetworkSection {
    /// Parse the configured network ID.
    pub fn parse_nid(&self) -> Result<Option<u64>, NodeError> {
        let Some(nid) = &self.nid else {
            return Ok(None);
        };
        u64::from_str_radix(nid, 16)
            .map(Some)
            .map_err(|e| NodeError::Config(format!("invalid nid {nid:?}: {e}")))
    }
}

/// The `[logging]` section.
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = NodeConfig::parse("").unwrap();
        assert_eq!(config.device.role, Role::Client);
        assert!(config.device.strict_msg_id);
        assert_eq!(config.network.max_clients, 16);
        assert_eq!(config.network.keep_alive_ms, 1_800_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn master_config_parses() {
        let config = NodeConfig::parse(
            r#"
            [device]
            role = "master"
            channel = 3

            [network]
            nid = "2a13f7890"
            max_clients = 4
            keep_alive_ms = 60000

            [logging]
            level = "debug"
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.device.role, Role::Master);
        assert_eq!(config.device.channel, 3);
        assert_eq!(config.network.parse_nid().unwrap(), Some(0x2A13F7890));
        assert_eq!(config.network.max_clients, 4);
        assert!(config.logging.json);
    }

    #[test]
    fn invite_code_is_validated() {
        let config = NodeConfig::parse("[device]\ninvite_code = \"k7m2p9qr\"").unwrap();
        assert!(config.device.invite_code().unwrap().is_some());

        let config = NodeConfig::parse("[device]\ninvite_code = \"short\"").unwrap();
        assert!(matches!(
            config.device.invite_code(),
            Err(NodeError::InvalidInviteCode(_))
        ));
    }

    #[test]
    fn bad_nid_is_a_config_error() {
        let config = NodeConfig::parse("[network]\nnid = \"zzz\"").unwrap();
        assert!(matches!(
            config.network.parse_nid(),
            Err(NodeError::Config(_))
        ));
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(NodeConfig::parse("[device]\nrole = \"relay\"").is_err());
    }
}
