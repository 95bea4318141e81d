//! Board configuration schema
//!
//! Every kernel-facing path is configurable so the daemon can be pointed at
//! a different board layout (or a test tree) without a rebuild. Defaults
//! match the dwc3-based layout this daemon ships on.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GadgetError, Result};

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GadgetConfig {
    /// ConfigFS gadget tree settings
    pub configfs: ConfigFsConfig,
    /// Descriptor monitor settings
    pub monitor: MonitorConfig,
    /// Controller IRQ affinity settings
    pub irq: IrqConfig,
    /// Charger-dependent current limiting settings
    pub power: PowerConfig,
    /// Web control plane settings
    pub web: WebConfig,
}

impl Default for GadgetConfig {
    fn default() -> Self {
        Self {
            configfs: ConfigFsConfig::default(),
            monitor: MonitorConfig::default(),
            irq: IrqConfig::default(),
            power: PowerConfig::default(),
            web: WebConfig::default(),
        }
    }
}

impl GadgetConfig {
    /// Load configuration from a JSON file, falling back to defaults for
    /// missing sections.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GadgetError::Config(format!("read {}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| GadgetError::Config(format!("parse {}: {}", path.display(), e)))
    }
}

/// ConfigFS gadget tree configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFsConfig {
    /// Root of the mounted configfs gadget tree
    pub configfs_root: PathBuf,
    /// Gadget directory name under the root
    pub gadget_dir: String,
    /// Configuration directory under the gadget (descriptor config)
    pub config_dir: String,
    /// UDC device name written to the pull-up file
    pub udc: String,
    /// Sysfs class directory holding UDC state (current_speed)
    pub udc_class_root: PathBuf,
    /// Root of the mounted FunctionFS instances
    pub ffs_root: PathBuf,
    /// Vendor extra composition selector (e.g. "diag"); empty for none.
    /// Mutually exclusive variants - only one composition string applies.
    pub vendor_extra: String,
    /// Debug-mode product id remapping the ADB-only composition
    pub adb_debug_pid: Option<u16>,
    /// Power-saving flag file written when a mapping carries a saving level
    pub saving_path: PathBuf,
}

impl Default for ConfigFsConfig {
    fn default() -> Self {
        Self {
            configfs_root: PathBuf::from("/config/usb_gadget"),
            gadget_dir: "g1".to_string(),
            config_dir: "configs/b.1".to_string(),
            udc: "11110000.dwc3".to_string(),
            udc_class_root: PathBuf::from("/sys/class/udc"),
            ffs_root: PathBuf::from("/dev/usb-ffs"),
            vendor_extra: String::new(),
            adb_debug_pid: None,
            saving_path: PathBuf::from("/sys/class/power_supply/usb/device/saving"),
        }
    }
}

impl ConfigFsConfig {
    pub fn gadget_path(&self) -> PathBuf {
        self.configfs_root.join(&self.gadget_dir)
    }

    pub fn config_path(&self) -> PathBuf {
        self.gadget_path().join(&self.config_dir)
    }

    pub fn functions_path(&self) -> PathBuf {
        self.gadget_path().join("functions")
    }

    /// Pull-up pseudo-file: write the UDC name to enable, "none" to disable
    pub fn pullup_path(&self) -> PathBuf {
        self.gadget_path().join("UDC")
    }

    pub fn id_vendor_path(&self) -> PathBuf {
        self.gadget_path().join("idVendor")
    }

    pub fn id_product_path(&self) -> PathBuf {
        self.gadget_path().join("idProduct")
    }

    pub fn speed_path(&self) -> PathBuf {
        self.udc_class_root.join(&self.udc).join("current_speed")
    }

    /// FunctionFS mount directory for an ffs function instance
    /// (e.g. "ffs.adb" mounts at <ffs_root>/adb)
    pub fn ffs_mount(&self, instance: &str) -> PathBuf {
        self.ffs_root.join(instance)
    }
}

/// Descriptor monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Initial poll interval in milliseconds
    pub poll_start_ms: u64,
    /// Poll interval cap in milliseconds
    pub poll_cap_ms: u64,
    /// Re-check interval once the gadget is pulled up
    pub settle_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_start_ms: 10,
            poll_cap_ms: 100,
            settle_ms: 500,
        }
    }
}

/// Controller IRQ affinity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IrqConfig {
    /// Kernel interrupt table
    pub interrupts_path: PathBuf,
    /// Per-IRQ directory root
    pub irq_root: PathBuf,
    /// Substring identifying the USB controller's interrupt line
    pub controller: String,
    /// CPU steered to while a tethering function is active
    pub big_core: String,
    /// CPU steered to otherwise
    pub medium_core: String,
}

impl Default for IrqConfig {
    fn default() -> Self {
        Self {
            interrupts_path: PathBuf::from("/proc/interrupts"),
            irq_root: PathBuf::from("/proc/irq"),
            controller: "dwc3".to_string(),
            big_core: "6".to_string(),
            medium_core: "4".to_string(),
        }
    }
}

/// Charger-dependent current limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Charger current limit file
    pub current_max_path: PathBuf,
    /// Currently detected charger type
    pub usb_type_path: PathBuf,
    /// Type-C port power operation mode
    pub power_mode_path: PathBuf,
    /// Limit (uA) applied in accessory mode on an SDP charger
    pub accessory_current_ua: String,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            current_max_path: PathBuf::from("/sys/class/power_supply/usb/current_max"),
            usb_type_path: PathBuf::from("/sys/class/power_supply/usb/usb_type"),
            power_mode_path: PathBuf::from("/sys/class/typec/port0/power_operation_mode"),
            accessory_current_ua: "1500000".to_string(),
        }
    }
}

/// Web control plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// Listen address
    pub bind_address: String,
    /// Listen port
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8423,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let cfg = ConfigFsConfig::default();
        assert_eq!(cfg.gadget_path(), PathBuf::from("/config/usb_gadget/g1"));
        assert_eq!(
            cfg.pullup_path(),
            PathBuf::from("/config/usb_gadget/g1/UDC")
        );
        assert_eq!(
            cfg.config_path(),
            PathBuf::from("/config/usb_gadget/g1/configs/b.1")
        );
        assert_eq!(
            cfg.speed_path(),
            PathBuf::from("/sys/class/udc/11110000.dwc3/current_speed")
        );
        assert_eq!(cfg.ffs_mount("adb"), PathBuf::from("/dev/usb-ffs/adb"));
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let raw = r#"{"configfs": {"udc": "musb-hdrc.0"}}"#;
        let cfg: GadgetConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.configfs.udc, "musb-hdrc.0");
        assert_eq!(cfg.configfs.gadget_dir, "g1");
        assert_eq!(cfg.web.port, 8423);
    }
}
