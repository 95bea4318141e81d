//! USB connection speed readout

use serde::Serialize;

/// Negotiated USB speed as reported by the UDC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UsbSpeed {
    #[default]
    Unknown,
    LowSpeed,
    FullSpeed,
    HighSpeed,
    SuperSpeed,
    SuperSpeedPlus,
}

impl UsbSpeed {
    /// Map the UDC `current_speed` attribute value
    pub fn from_sysfs(value: &str) -> Self {
        match value {
            "low-speed" => UsbSpeed::LowSpeed,
            "full-speed" => UsbSpeed::FullSpeed,
            "high-speed" => UsbSpeed::HighSpeed,
            "super-speed" => UsbSpeed::SuperSpeed,
            "super-speed-plus" => UsbSpeed::SuperSpeedPlus,
            _ => UsbSpeed::Unknown,
        }
    }
}
