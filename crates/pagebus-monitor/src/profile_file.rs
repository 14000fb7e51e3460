//! JSON machine descriptions understood by the monitor.
//!
//! A monitor profile is a [`MachineProfile`] plus the overlay layers and
//! soft-switch pages that sit on top of it. Layers are named so switch
//! bindings can refer to them before layer ids exist.

use std::fs;
use std::path::Path;

use pagebus_core::{MachineProfile, PagePerms, RegionTag};
use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

/// One overlay layer backed by its own RAM or ROM block.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LayerSpec {
    /// Unique layer name.
    pub name: String,
    /// Priority; higher wins.
    #[serde(default)]
    pub priority: i32,
    /// First overridden address; page aligned.
    pub start: u32,
    /// Overridden length in bytes; page aligned.
    pub size: u32,
    /// Initial contents of the layer's backing store.
    #[serde(default)]
    pub fill: u8,
    /// Permissions while active.
    #[serde(default = "default_perms")]
    pub perms: PagePerms,
    /// Region classification while active.
    #[serde(default = "default_region")]
    pub region: RegionTag,
    /// Activate right after construction.
    #[serde(default)]
    pub active: bool,
}

const fn default_perms() -> PagePerms {
    PagePerms::RWX
}

const fn default_region() -> RegionTag {
    RegionTag::Ram
}

/// Layer operation bound to a soft-switch offset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum SwitchOp {
    /// Show a layer.
    Activate {
        /// Layer name.
        layer: String,
    },
    /// Hide a layer.
    Deactivate {
        /// Layer name.
        layer: String,
    },
    /// Hide `off`, then show `on`.
    Select {
        /// Layer to show.
        on: String,
        /// Layer to hide.
        off: String,
    },
    /// Store a mode code in the device latch.
    Latch {
        /// Mode code.
        mode: u8,
    },
}

/// Actions attached to one soft-switch offset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SwitchBinding {
    /// Offset within the soft-switch page range.
    pub offset: u32,
    /// Fired by side-effecting reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_read: Option<SwitchOp>,
    /// Fired by side-effecting writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_write: Option<SwitchOp>,
}

/// A page range answered by a soft-switch device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SoftSwitchSpec {
    /// Device and target name.
    pub name: String,
    /// First address; page aligned.
    pub start: u32,
    /// Length in bytes; page aligned.
    pub size: u32,
    /// Offset bindings; unlisted offsets are inert.
    #[serde(default)]
    pub switches: Vec<SwitchBinding>,
}

/// Everything needed to build a monitor session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MonitorProfile {
    /// Base address space.
    #[serde(flatten)]
    pub machine: MachineProfile,
    /// Overlay layers in creation order.
    #[serde(default)]
    pub layers: Vec<LayerSpec>,
    /// Soft-switch pages.
    #[serde(default)]
    pub soft_switches: Vec<SoftSwitchSpec>,
}

impl MonitorProfile {
    /// Wraps a plain machine profile with no layers or switches.
    #[must_use]
    pub const fn new(machine: MachineProfile) -> Self {
        Self {
            machine,
            layers: Vec::new(),
            soft_switches: Vec::new(),
        }
    }

    /// Parses a profile from JSON text.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] for malformed input.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Renders the profile as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Render`] if serialization fails.
    pub fn to_json(&self) -> Result<String, MonitorError> {
        serde_json::to_string_pretty(self).map_err(MonitorError::Render)
    }
}

/// Reads and parses a profile file.
///
/// # Errors
///
/// Returns [`MonitorError::Io`] when the file cannot be read and
/// [`MonitorError::ProfileJson`] when it is not a valid profile.
pub fn load_profile(path: &Path) -> Result<MonitorProfile, MonitorError> {
    let text = fs::read_to_string(path).map_err(|source| MonitorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let profile = MonitorProfile::from_json(&text).map_err(|source| MonitorError::ProfileJson {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(
        path = %path.display(),
        profile = %profile.machine.name,
        regions = profile.machine.regions.len(),
        layers = profile.layers.len(),
        "loaded profile"
    );
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::{MonitorProfile, SwitchOp};
    use pagebus_core::{PagePerms, RegionKind, RegionTag};

    const MINIMAL: &str = r#"{
        "name": "tiny",
        "regions": [
            { "name": "ram", "start": 0, "size": 4096,
              "kind": { "type": "ram", "fill": 170 }, "region": "ram" }
        ],
        "layers": [
            { "name": "shadow", "start": 0, "size": 256 }
        ],
        "soft_switches": [
            { "name": "io", "start": 49152, "size": 256,
              "switches": [ { "offset": 1, "on_read": { "op": "activate", "layer": "shadow" } } ] }
        ]
    }"#;

    #[test]
    fn minimal_profile_fills_defaults() {
        let profile = MonitorProfile::from_json(MINIMAL).expect("valid profile");
        assert_eq!(profile.machine.address_bits, 16);
        assert_eq!(profile.machine.page_shift, 8);
        assert_eq!(profile.machine.regions[0].kind, RegionKind::Ram { fill: 0xAA });
        assert_eq!(profile.machine.regions[0].perms, PagePerms::RWX);
        let layer = &profile.layers[0];
        assert_eq!((layer.priority, layer.fill, layer.active), (0, 0, false));
        assert_eq!(layer.region, RegionTag::Ram);
        assert_eq!(
            profile.soft_switches[0].switches[0].on_read,
            Some(SwitchOp::Activate {
                layer: "shadow".to_owned()
            })
        );
        assert!(profile.soft_switches[0].switches[0].on_write.is_none());
    }

    #[test]
    fn rendered_json_parses_back() {
        let profile = MonitorProfile::from_json(MINIMAL).expect("valid profile");
        let text = profile.to_json().expect("render");
        assert_eq!(MonitorProfile::from_json(&text).expect("reparse"), profile);
    }

    #[test]
    fn missing_regions_is_an_error() {
        assert!(MonitorProfile::from_json(r#"{ "name": "empty" }"#).is_err());
    }
}
