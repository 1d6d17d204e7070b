use std::path::{Path, PathBuf};

use payload_channel::ReceiverConfig;

// =============================================================================
// Config loading (figment: defaults / config.toml / PAYLOAD_* env vars)
// =============================================================================

/// Top-level string keys taken from the environment exactly as written.
///
/// figment parses env values, so `PAYLOAD_PASSWORD=123456` would arrive as an
/// integer and `007` as `7`.
const VERBATIM_ENV_KEYS: &[&str] = &["name", "guid", "password", "host"];

/// `~/.payload-tail/config.toml`, if a home directory exists.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".payload-tail").join("config.toml"))
}

/// Build a figment that layers: defaults → config.toml → PAYLOAD_* env vars.
///
/// A missing config file is not an error; its layer is simply empty.
///
/// Env vars use double-underscore for nesting into sections:
///   `PAYLOAD_GUID=abc`  →  `guid = "abc"`
///   `PAYLOAD_BROKER__PORT=9443`  →  `broker.port = 9443`
pub fn load_config(path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(ReceiverConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }

    let env = Env::prefixed("PAYLOAD_").split("__");
    figment = figment.merge(env.clone().ignore(VERBATIM_ENV_KEYS));
    for (key, value) in env.only(VERBATIM_ENV_KEYS).iter() {
        figment = figment.merge(Serialized::default(key.as_str(), value));
    }
    figment
}

/// Values given on the command line; they win over every other layer.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub guid: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
}

impl Overrides {
    pub fn apply(self, config: &mut ReceiverConfig) {
        if let Some(guid) = self.guid {
            config.credentials.guid = guid;
        }
        if let Some(password) = self.password {
            config.credentials.password = password;
        }
        if let Some(host) = self.host {
            config.credentials.host = host;
        }
    }
}

/// Extract the layered config and apply CLI overrides on top.
pub fn resolve(path: Option<&Path>, overrides: Overrides) -> Result<ReceiverConfig, figment::Error> {
    let mut config: ReceiverConfig = load_config(path).extract()?;
    overrides.apply(&mut config);
    Ok(config)
}
