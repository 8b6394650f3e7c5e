//! Configuration Vault – reads/writes `~/.toybridge/config.toml`.
//!
//! The file holds the connection settings, the loop tunables and the toy
//! slots.  A slot with an empty `name` is a free slot: discovery writes newly
//! found toys into it and saves the file, so the user only has to fill in
//! parameter names once.  A free slot may name the protocol it waits for;
//! one that does not takes the first toy any discovery reports.

use std::collections::HashSet;
use std::fs;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use toybridge_hal::{ButtplugSettings, Protocol};
use toybridge_runtime::{AxisScale, BridgeSettings, ChannelSpec, CommandChannelSettings, Rounding};
use toybridge_types::{Axis, ToyChannel, ToyId};

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// One axis of one toy slot.  Unset scale fields fall back to the axis
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Avatar parameter name, appended to `parameter_prefix`.
    pub parameter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rounding: Option<Rounding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_intensity: Option<u32>,
}

impl AxisConfig {
    pub fn new(parameter: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            multiplier: None,
            rounding: None,
            contact_intensity: None,
        }
    }

    pub fn scale(&self, axis: Axis) -> AxisScale {
        let default = AxisScale::default_for(axis);
        AxisScale {
            multiplier: self.multiplier.unwrap_or(default.multiplier),
            rounding: self.rounding.unwrap_or(default.rounding),
            contact_intensity: self.contact_intensity.unwrap_or(default.contact_intensity),
        }
    }
}

/// A `[[toys]]` entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToySlot {
    /// Toy name as reported by its driver.  Empty marks a free slot.
    #[serde(default)]
    pub name: String,
    /// Unset means Lovense for a named slot and "any" for a free slot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibrate: Option<AxisConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotate: Option<AxisConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pump: Option<AxisConfig>,
}

impl ToySlot {
    pub fn is_free(&self) -> bool {
        self.name.trim().is_empty()
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol.unwrap_or_default()
    }

    /// Whether this free slot can take a toy found through `protocol`.
    fn accepts(&self, protocol: Protocol) -> bool {
        self.is_free() && self.protocol.is_none_or(|p| p == protocol)
    }

    /// Configured axes, in [`Axis::ALL`] order.
    pub fn axes(&self) -> impl Iterator<Item = (Axis, &AxisConfig)> {
        [
            (Axis::Vibrate, self.vibrate.as_ref()),
            (Axis::Rotate, self.rotate.as_ref()),
            (Axis::Pump, self.pump.as_ref()),
        ]
        .into_iter()
        .filter_map(|(axis, cfg)| cfg.map(|c| (axis, c)))
    }
}

/// Persisted user configuration stored in `~/.toybridge/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// UDP port the OSC listener binds to.
    #[serde(default = "default_osc_port")]
    pub osc_port: u16,

    #[serde(default = "default_osc_host")]
    pub osc_host: String,

    /// Prefix joined with each axis `parameter` to form its OSC address.
    #[serde(default = "default_parameter_prefix")]
    pub parameter_prefix: String,

    /// Base URL shown by the Lovense Connect app.
    #[serde(default = "default_lovense_url")]
    pub lovense_url: String,

    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// Silent ticks before an active channel is stopped.
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: u32,

    #[serde(default)]
    pub skip_after_dispatch: u32,

    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// `0` means unlimited.
    #[serde(default)]
    pub max_commands_per_second: u32,

    #[serde(default = "default_true")]
    pub ignore_duplicates: bool,

    /// How long the embedded Buttplug server scans for devices.
    #[serde(default = "default_buttplug_scan_ms")]
    pub buttplug_scan_ms: u64,

    /// Duration of one Buttplug linear stroke.
    #[serde(default = "default_buttplug_move_speed_ms")]
    pub buttplug_move_speed_ms: u32,

    #[serde(default)]
    pub toys: Vec<ToySlot>,
}

fn default_osc_port() -> u16 {
    9001
}
fn default_osc_host() -> String {
    "127.0.0.1".to_string()
}
fn default_parameter_prefix() -> String {
    "/avatar/parameters/".to_string()
}
fn default_lovense_url() -> String {
    "http://127.0.0.1:20010".to_string()
}
fn default_idle_backoff_ms() -> u64 {
    10
}
fn default_silence_threshold() -> u32 {
    30
}
fn default_command_timeout_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}
fn default_buttplug_scan_ms() -> u64 {
    5000
}
fn default_buttplug_move_speed_ms() -> u32 {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            osc_port: default_osc_port(),
            osc_host: default_osc_host(),
            parameter_prefix: default_parameter_prefix(),
            lovense_url: default_lovense_url(),
            idle_backoff_ms: default_idle_backoff_ms(),
            silence_threshold: default_silence_threshold(),
            skip_after_dispatch: 0,
            command_timeout_ms: default_command_timeout_ms(),
            max_commands_per_second: 0,
            ignore_duplicates: true,
            buttplug_scan_ms: default_buttplug_scan_ms(),
            buttplug_move_speed_ms: default_buttplug_move_speed_ms(),
            toys: vec![ToySlot {
                name: String::new(),
                protocol: None,
                vibrate: Some(AxisConfig::new("Vibrate")),
                rotate: Some(AxisConfig::new("Rotate")),
                pump: Some(AxisConfig::new("Pump")),
            }],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Derived settings
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Named slots only.
    pub fn named_toys(&self) -> impl Iterator<Item = &ToySlot> {
        self.toys.iter().filter(|t| !t.is_free())
    }

    /// Whether a driver for `protocol` is needed: a named slot uses it, or a
    /// free slot waits for one of its toys.  A free slot without a protocol
    /// only asks for Lovense discovery while no toy is named at all.
    pub fn uses_protocol(&self, protocol: Protocol) -> bool {
        if self.named_toys().any(|t| t.protocol() == protocol) {
            return true;
        }
        let nothing_named = self.named_toys().next().is_none();
        self.toys.iter().filter(|t| t.is_free()).any(|t| match t.protocol {
            Some(p) => p == protocol,
            None => nothing_named && protocol == Protocol::Lovense,
        })
    }

    pub fn address_for(&self, axis: &AxisConfig) -> String {
        format!("{}{}", self.parameter_prefix, axis.parameter.trim())
    }

    /// The static channel table for every named slot.
    pub fn channel_table(&self) -> Vec<ChannelSpec> {
        self.named_toys()
            .flat_map(|slot| {
                slot.axes().map(move |(axis, cfg)| ChannelSpec {
                    channel: ToyChannel::new(slot.name.trim(), axis),
                    address: self.address_for(cfg),
                    scale: cfg.scale(axis),
                })
            })
            .collect()
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            idle_backoff: Duration::from_millis(self.idle_backoff_ms),
            silence_threshold: self.silence_threshold,
            skip_after_dispatch: self.skip_after_dispatch,
            ignore_duplicates: self.ignore_duplicates,
        }
    }

    pub fn buttplug_settings(&self) -> ButtplugSettings {
        ButtplugSettings {
            scan_window: Duration::from_millis(self.buttplug_scan_ms),
            move_speed_ms: self.buttplug_move_speed_ms,
        }
    }

    pub fn command_settings(&self) -> CommandChannelSettings {
        CommandChannelSettings {
            timeout: Duration::from_millis(self.command_timeout_ms),
            max_commands_per_second: NonZeroU32::new(self.max_commands_per_second),
        }
    }

    /// Toys of `protocol` named in the config.
    pub fn toys_for(&self, protocol: Protocol) -> Vec<ToyId> {
        self.named_toys()
            .filter(|t| t.protocol() == protocol)
            .map(|t| ToyId::new(t.name.trim()))
            .collect()
    }

    // ── Validation ────────────────────────────────────────────────────────

    /// Check everything the bridge needs before it starts.
    pub fn validate(&self) -> Result<(), String> {
        if self.osc_port == 0 {
            return Err("Port error in configuration file: osc_port must be non-zero".to_string());
        }
        if self.silence_threshold == 0 {
            return Err("silence_threshold must be at least 1".to_string());
        }
        if self.command_timeout_ms == 0 {
            return Err("command_timeout_ms must be non-zero".to_string());
        }
        if self.uses_protocol(Protocol::Lovense) && self.lovense_url.trim().is_empty() {
            return Err(
                "lovense_url is empty: enter the address shown by the Lovense Connect app".to_string(),
            );
        }
        if self.uses_protocol(Protocol::Buttplug) {
            if self.buttplug_scan_ms == 0 {
                return Err("buttplug_scan_ms must be non-zero".to_string());
            }
            if self.buttplug_move_speed_ms == 0 {
                return Err("buttplug_move_speed_ms must be non-zero".to_string());
            }
        }

        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        for slot in self.named_toys() {
            let name = slot.name.trim();
            if !names.insert(name) {
                return Err(format!("Toy {name} is configured twice"));
            }
            if slot.axes().next().is_none() {
                return Err(format!("Toy {name} has no vibrate, rotate or pump parameter"));
            }
            for (axis, cfg) in slot.axes() {
                if cfg.parameter.trim().is_empty() {
                    return Err(format!("Toy {name}: {axis} parameter name is empty"));
                }
                if let Some(m) = cfg.multiplier {
                    if !(m.is_finite() && m > 0.0) {
                        return Err(format!(
                            "Toy {name}: {axis} multiplier must be a positive number, got {m}"
                        ));
                    }
                }
                let address = self.address_for(cfg);
                if !addresses.insert(address.clone()) {
                    return Err(format!("Parameter {address} drives more than one toy axis"));
                }
            }
        }
        Ok(())
    }

    // ── Slot assignment ───────────────────────────────────────────────────

    /// Write each discovered toy not yet in the config into the next free
    /// slot.  Returns the names that were newly assigned.
    pub fn assign_discovered(&mut self, protocol: Protocol, discovered: &[ToyId]) -> Result<Vec<ToyId>, String> {
        let mut assigned = Vec::new();
        for toy in discovered {
            if self.toys.iter().any(|t| t.name.trim() == toy.as_str()) {
                continue;
            }
            let slot = self.toys.iter_mut().find(|t| t.accepts(protocol)).ok_or_else(|| {
                format!(
                    "No empty slot to save {protocol} toy {toy}: add a [[toys]] entry with an empty name"
                )
            })?;
            slot.name = toy.to_string();
            slot.protocol = Some(protocol);
            assigned.push(toy.clone());
        }
        Ok(assigned)
    }

    /// Drop free slots and slots whose toy no driver discovered.
    pub fn retain_discovered(&mut self, found: &[ToyId]) {
        self.toys
            .retain(|slot| !slot.is_free() && found.iter().any(|t| t.as_str() == slot.name.trim()));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Return the config path: `TOYBRIDGE_CONFIG` if set, otherwise
/// `~/.toybridge/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TOYBRIDGE_CONFIG") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".toybridge").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `TOYBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TOYBRIDGE_OSC_PORT` | `osc_port` |
/// | `TOYBRIDGE_LOVENSE_URL` | `lovense_url` |
/// | `TOYBRIDGE_SILENCE_THRESHOLD` | `silence_threshold` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(port) = lookup("TOYBRIDGE_OSC_PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
        cfg.osc_port = port;
    }
    if let Some(url) = lookup("TOYBRIDGE_LOVENSE_URL") {
        cfg.lovense_url = url;
    }
    if let Some(n) = lookup("TOYBRIDGE_SILENCE_THRESHOLD").and_then(|v| v.trim().parse::<u32>().ok()) {
        cfg.silence_threshold = n;
    }
}

/// Save the config, creating its directory if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
