use crate::error::{FilterError, Result};
use crate::network::compose_interface;
use crate::rules::Mode;
use crate::store::write_atomic;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CONFIG_FILE: &str = "mac-filter.conf";
pub const DIR_ENV: &str = "MAC_FILTER_DIR";
const APP_DIR: &str = "mac-filter";

/// The interface, VLAN and mode of the last successful apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedConfig {
    pub interface: String,
    pub vlan: Option<u16>,
    pub mode: Mode,
}

pub fn default_store_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| FilterError::SystemError("Could not find config directory".into()))?
        .join(APP_DIR))
}

impl AppliedConfig {
    pub fn composed_interface(&self) -> Result<String> {
        compose_interface(&self.interface, self.vlan)
    }

    pub fn render(&self) -> String {
        let mut out = format!("INTERFACE={}\n", self.interface);
        if let Some(vlan) = self.vlan {
            out.push_str(&format!("VLAN={}\n", vlan));
        }
        out.push_str(&format!("MODE={}\n", self.mode));
        out
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let error = |message: String| FilterError::Config {
            path: path.to_path_buf(),
            message,
        };

        let mut interface = None;
        let mut vlan = None;
        let mut mode = None;

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| error(format!("line {}: expected KEY=value", index + 1)))?;
            let value = value.trim().trim_matches('"');

            match key.trim().to_ascii_uppercase().as_str() {
                "INTERFACE" => interface = Some(value.to_string()),
                "VLAN" if value.is_empty() => vlan = None,
                "VLAN" => {
                    let id = value
                        .parse::<u16>()
                        .map_err(|e| error(format!("line {}: bad VLAN '{}': {}", index + 1, value, e)))?;
                    vlan = Some(id);
                }
                "MODE" => {
                    mode = Some(
                        value
                            .parse::<Mode>()
                            .map_err(|e| error(format!("line {}: {}", index + 1, e)))?,
                    );
                }
                other => warn!("{}:{}: ignoring unknown key {}", path.display(), index + 1, other),
            }
        }

        let config = AppliedConfig {
            interface: interface.ok_or_else(|| error("INTERFACE is not set".into()))?,
            vlan,
            mode: mode.ok_or_else(|| error("MODE is not set".into()))?,
        };
        config
            .composed_interface()
            .map_err(|e| error(e.to_string()))?;
        Ok(config)
    }
}

/// `Ok(None)` when nothing has been applied yet.
pub fn load_config(dir: &Path) -> Result<Option<AppliedConfig>> {
    let path = dir.join(CONFIG_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(FilterError::ReadFile { path, source }),
    };

    let config = AppliedConfig::parse(&content, &path)?;
    debug!("Loaded saved config from {}: {:?}", path.display(), config);
    Ok(Some(config))
}

pub fn save_config(dir: &Path, config: &AppliedConfig) -> Result<()> {
    let path = dir.join(CONFIG_FILE);
    write_atomic(&path, &config.render())?;
    debug!("Saved config to {}", path.display());
    Ok(())
}
