use std::{fs::read_to_string, net::SocketAddr, str::FromStr};

use anyhow::Result;
use base64::{Engine, prelude::BASE64_STANDARD};
use clap::Parser;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where the ICE rendezvous lives: a concrete address the operator pinned,
/// or a hostname resolved at handshake time.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct IceRendezvous {
    #[serde(default)]
    pub custom: Option<SocketAddr>,
    #[serde(default = "IceRendezvous::hostname")]
    pub hostname: String,
    #[serde(default)]
    pub use_custom_ice_server: bool,
}

impl IceRendezvous {
    fn hostname() -> String {
        "ice.highfidelity.io:7337".to_string()
    }
}

impl Default for IceRendezvous {
    fn default() -> Self {
        Self {
            custom: None,
            hostname: Self::hostname(),
            use_custom_ice_server: false,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct StunServer {
    #[serde(default = "StunServer::hostname")]
    pub hostname: String,
    #[serde(default = "StunServer::port")]
    pub port: u16,
}

impl StunServer {
    fn hostname() -> String {
        "stun3.l.google.com".to_string()
    }

    fn port() -> u16 {
        19302
    }
}

impl Default for StunServer {
    fn default() -> Self {
        Self {
            hostname: Self::hostname(),
            port: Self::port(),
        }
    }
}

fn deserialize_base64<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    BASE64_STANDARD.decode(&encoded).map_err(serde::de::Error::custom)
}

fn serialize_base64<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&BASE64_STANDARD.encode(bytes))
}

/// Everything the bridge needs to identify itself to a domain: what it
/// claims to be running, and which domain it claims to be joining.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Bridge {
    ///
    /// Listen address for the signaling websocket browser clients connect
    /// to.
    ///
    #[serde(default = "Bridge::listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub stun_server: StunServer,
    #[serde(default)]
    pub ice_rendezvous: IceRendezvous,
    pub domain_id: Uuid,
    #[serde(default = "Bridge::place_name")]
    pub place_name: String,
    #[serde(
        default,
        serialize_with = "serialize_base64",
        deserialize_with = "deserialize_base64"
    )]
    pub protocol_version_signature: Vec<u8>,
    #[serde(default = "Uuid::new_v4")]
    pub machine_fingerprint: Uuid,
    ///
    /// Whether domain-id resolution has already completed by the time the
    /// bridge starts. The STUN phase will not fire a single request until
    /// this is true.
    ///
    #[serde(default = "Bridge::finished_domain_id_request")]
    pub finished_domain_id_request: bool,
}

impl Bridge {
    fn listen() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn place_name() -> String {
        String::new()
    }

    fn finished_domain_id_request() -> bool {
        true
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

/// A small status surface: connection count and per-connection phase.
/// Optional because a bridge embedded in a larger server may prefer to
/// expose its own admin surface instead.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Api {
    #[serde(default = "Api::listen")]
    pub listen: SocketAddr,
    #[serde(default = "Api::timeout")]
    pub timeout: u32,
}

impl Api {
    fn listen() -> SocketAddr {
        "127.0.0.1:3000".parse().unwrap()
    }

    fn timeout() -> u32 {
        5
    }
}

impl Default for Api {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            timeout: Self::timeout(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub bridge: Bridge,
    #[serde(default)]
    pub api: Option<Api>,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: hifi-bridge --config /etc/hifi-bridge/config.toml
    ///
    #[arg(long, short)]
    config: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(toml::from_str::<Self>(&read_to_string(&Cli::parse().config)?)?)
    }
}
