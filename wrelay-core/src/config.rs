//! Build-time provisioning. Values come from `cfg.toml` next to this
//! crate's manifest (see `cfg.toml.example`) via `toml-cfg`, and are
//! validated into a [`DeviceConfig`] once at startup.

use core::{fmt::Write, str::FromStr};

use crate::{
    ConfigError, DeviceIdentity, Endpoint, Fingerprint, LinkCredentials, TlsBuffers,
    TrustMaterial, MAX_TOPIC_LEN,
};

/// GPIO driving the relay coil
pub const RELAY_PIN: u8 = 0;

#[toml_cfg::toml_config]
pub struct Config {
    #[default("wifi-relay")]
    namespace: &'static str,
    #[default("")]
    device_id: &'static str,
    #[default("")]
    client_id: &'static str,
    #[default("")]
    user: &'static str,
    #[default("")]
    password: &'static str,
    #[default("")]
    broker_host: &'static str,
    #[default(8883)]
    broker_port: u16,
    #[default("")]
    wifi_ssid: &'static str,
    #[default("")]
    wifi_password: &'static str,
    #[default("pool.ntp.org")]
    ntp_server: &'static str,
    #[default(3600)]
    utc_offset_secs: i32,
    #[default("")]
    ca_cert: &'static str,
    #[default("")]
    server_fingerprint: &'static str,
    #[default(true)]
    allow_self_signed: bool,
    #[default(512)]
    tls_rx_buffer: usize,
    #[default(512)]
    tls_tx_buffer: usize,
    #[default("esp8266s")]
    board: &'static str,
}

/// Board variants differ in which GPIO carries the built-in LED
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardVariant {
    Esp8266S,
    Esp8266Ex,
}

impl BoardVariant {
    pub fn led_pin(self) -> u8 {
        match self {
            BoardVariant::Esp8266S => 2,
            BoardVariant::Esp8266Ex => 1,
        }
    }
}

impl FromStr for BoardVariant {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("esp8266s") {
            Ok(BoardVariant::Esp8266S)
        } else if s.eq_ignore_ascii_case("esp8266ex") {
            Ok(BoardVariant::Esp8266Ex)
        } else {
            Err(ConfigError::Board)
        }
    }
}

/// Command (`<namespace>/<device-id>/r`) and status (`.../w`) topics,
/// derived once and never changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    command: heapless::String<MAX_TOPIC_LEN>,
    status: heapless::String<MAX_TOPIC_LEN>,
}

impl Topics {
    pub fn new(namespace: &str, device_id: &str) -> Result<Self, ConfigError> {
        if namespace.is_empty() {
            return Err(ConfigError::Missing("namespace"));
        }
        if device_id.is_empty() {
            return Err(ConfigError::Missing("device_id"));
        }

        let mut command = heapless::String::new();
        let mut status = heapless::String::new();
        write!(command, "{namespace}/{device_id}/r").map_err(|_| ConfigError::TopicTooLong)?;
        write!(status, "{namespace}/{device_id}/w").map_err(|_| ConfigError::TopicTooLong)?;
        Ok(Self { command, status })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn status(&self) -> &str {
        &self.status
    }
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub namespace: &'static str,
    pub device_id: &'static str,
    pub identity: DeviceIdentity,
    pub link: LinkCredentials,
    pub endpoint: Endpoint,
    pub trust: TrustMaterial,
    pub tls_buffers: TlsBuffers,
    pub ntp_server: &'static str,
    pub utc_offset_secs: i32,
    pub board: BoardVariant,
}

impl DeviceConfig {
    /// Validates the values compiled in from `cfg.toml`
    pub fn from_build() -> Result<Self, ConfigError> {
        let cfg = CONFIG;

        let config = Self {
            namespace: cfg.namespace,
            device_id: required("device_id", cfg.device_id)?,
            identity: DeviceIdentity {
                client_id: required("client_id", cfg.client_id)?,
                user: required("user", cfg.user)?,
                password: cfg.password,
            },
            link: LinkCredentials {
                ssid: required("wifi_ssid", cfg.wifi_ssid)?,
                password: cfg.wifi_password,
            },
            endpoint: Endpoint {
                host: required("broker_host", cfg.broker_host)?,
                port: cfg.broker_port,
            },
            trust: TrustMaterial {
                root_certs: required("ca_cert", cfg.ca_cert)?,
                fingerprint: parse_fingerprint(cfg.server_fingerprint)?,
                allow_self_signed: cfg.allow_self_signed,
            },
            tls_buffers: TlsBuffers {
                rx: cfg.tls_rx_buffer,
                tx: cfg.tls_tx_buffer,
            },
            ntp_server: cfg.ntp_server,
            utc_offset_secs: cfg.utc_offset_secs,
            board: cfg.board.parse()?,
        };
        // surfaces over-long topics at startup rather than on first use
        config.topics()?;
        Ok(config)
    }

    pub fn topics(&self) -> Result<Topics, ConfigError> {
        Topics::new(self.namespace, self.device_id)
    }
}

fn required(key: &'static str, value: &'static str) -> Result<&'static str, ConfigError> {
    if value.is_empty() {
        log::error!("Missing value for {key} in cfg.toml");
        return Err(ConfigError::Missing(key));
    }
    Ok(value)
}

/// Accepts `8ee1279c...` as well as `8E:E1:27:9C ...` forms
pub fn parse_fingerprint(s: &str) -> Result<Fingerprint, ConfigError> {
    let mut digits: heapless::String<40> = heapless::String::new();
    for c in s.chars().filter(|c| !matches!(c, ':' | ' ')) {
        digits.push(c).map_err(|_| ConfigError::Fingerprint)?;
    }

    let mut out = [0u8; 20];
    hex::decode_to_slice(digits.as_str(), &mut out).map_err(|_| ConfigError::Fingerprint)?;
    Ok(out)
}
