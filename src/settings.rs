//! Loading and validation of settings.
//!
//! Values defined in the configuration file can be overridden by environment variables prefixed
//! with `PDDM__`, with `__` separating the sections, _e.g._ `PDDM__NODE__ID=2`. An example of a
//! configuration file can be found in the `configs/` directory located in the repository root.

use std::{collections::HashSet, fmt, path::Path};

use config::{Config, ConfigError, Environment};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    net::{AddressTable, PeerAddress},
    PeerId,
};

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Validate, Deserialize)]
#[validate(schema(function = "validate_peers"))]
/// The combined settings of a node.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    #[validate]
    pub node: NodeSettings,
    #[validate]
    pub peers: Vec<PeerSettings>,
    #[validate]
    pub transport: TransportSettings,
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(Environment::with_prefix("pddm").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// The addresses of the peers of this node.
    pub fn address_table(&self) -> AddressTable {
        self.peers
            .iter()
            .map(|peer| (peer.id, PeerAddress::new(peer.host.clone(), peer.port)))
            .collect()
    }
}

fn validate_peers(settings: &Settings) -> Result<(), ValidationError> {
    if settings.peers.is_empty() {
        return Err(ValidationError::new("no peers"));
    }
    let mut ids = HashSet::new();
    for peer in &settings.peers {
        if peer.id == settings.node.id {
            return Err(ValidationError::new("the node is listed among its peers"));
        }
        if !ids.insert(peer.id) {
            return Err(ValidationError::new("duplicated peer id"));
        }
    }
    Ok(())
}

#[derive(Debug, Validate, Deserialize)]
/// The identity of the node.
pub struct NodeSettings {
    /// The id of the node. The utility conventionally has the id `0`.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [node]
    /// id = 1
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// PDDM__NODE__ID=1
    /// ```
    pub id: PeerId,

    /// The address the node listens on.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [node]
    /// address = { host = "0.0.0.0", port = 7001 }
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// PDDM__NODE__ADDRESS__HOST=0.0.0.0
    /// PDDM__NODE__ADDRESS__PORT=7001
    /// ```
    #[validate]
    pub address: PeerAddress,
}

#[derive(Debug, Validate, Deserialize)]
/// A peer of the node.
///
/// # Examples
///
/// **TOML**
/// ```text
/// [[peers]]
/// id = 2
/// host = "meter-2.local"
/// port = 7002
/// ```
pub struct PeerSettings {
    pub id: PeerId,
    #[validate(length(min = 1))]
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Validate, Deserialize)]
/// The transport settings.
pub struct TransportSettings {
    /// The maximal size in bytes of a payload. Connections sending larger frames are dropped.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [transport]
    /// max_message_size = 1048576
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// PDDM__TRANSPORT__MAX_MESSAGE_SIZE=1048576
    /// ```
    #[validate(range(min = 1))]
    pub max_message_size: usize,
}

#[derive(Debug, Deserialize)]
/// The logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// PDDM__LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.3.17/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: PeerId, peers: &[PeerId]) -> Settings {
        Settings {
            node: NodeSettings {
                id,
                address: PeerAddress::new("127.0.0.1", 7000),
            },
            peers: peers
                .iter()
                .map(|peer| PeerSettings {
                    id: *peer,
                    host: "127.0.0.1".to_string(),
                    port: 7000 + *peer as u16,
                })
                .collect(),
            transport: TransportSettings {
                max_message_size: 1024,
            },
            log: LoggingSettings {
                filter: EnvFilter::try_new("info").unwrap(),
            },
        }
    }

    #[test]
    fn test_settings_new() {
        let settings = Settings::new("configs/node.toml").unwrap();
        assert_eq!(settings.node.id, 1);
        assert_eq!(settings.node.address, PeerAddress::new("127.0.0.1", 7001));
        assert_eq!(settings.transport.max_message_size, 1_048_576);

        let table = settings.address_table();
        assert_eq!(table.peers(), vec![0, 2, 3]);
        assert_eq!(table.get(0), Some(&PeerAddress::new("127.0.0.1", 7000)));
    }

    #[test]
    fn test_settings_missing_file() {
        assert!(matches!(
            Settings::new("configs/does-not-exist.toml"),
            Err(SettingsError::Loading(_))
        ));
    }

    #[test]
    fn test_validate_peers() {
        assert!(sample(1, &[0, 2]).validate().is_ok());
        assert!(sample(1, &[]).validate().is_err());
        assert!(sample(1, &[0, 1]).validate().is_err());
        assert!(sample(1, &[0, 2, 0]).validate().is_err());
    }

    #[test]
    fn test_validate_transport() {
        let mut settings = sample(1, &[0]);
        settings.transport.max_message_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_hosts() {
        let mut settings = sample(1, &[0]);
        settings.peers[0].host.clear();
        assert!(settings.validate().is_err());

        let mut settings = sample(1, &[0]);
        settings.node.address.host.clear();
        assert!(settings.validate().is_err());
    }
}
