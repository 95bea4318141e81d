//! Function validation and VID/PID resolution
//!
//! The supported composition table is built once at service construction.
//! An exhaustive lookup structure (instead of a conditional chain) means an
//! unlisted combination can never silently fall through to a neighbour's
//! identity.

use std::collections::HashMap;

use tracing::warn;

use super::configfs::write_file;
use super::function::FunctionSet;
use crate::config::ConfigFsConfig;
use crate::error::{GadgetError, Result};

/// Resolved USB identity for one function combination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VidPid {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Power-saving level flag written alongside the identity, if any
    pub saving: Option<&'static str>,
}

impl VidPid {
    const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            saving: None,
        }
    }

    const fn saving(vendor_id: u16, product_id: u16, level: &'static str) -> Self {
        Self {
            vendor_id,
            product_id,
            saving: Some(level),
        }
    }
}

const fn mask(sets: &[FunctionSet]) -> u64 {
    let mut mask = 0;
    let mut i = 0;
    while i < sets.len() {
        mask |= sets[i].0;
        i += 1;
    }
    mask
}

/// Supported compositions for this board family.
///
/// UVC combinations are deliberately absent: the shipping kernel's UVC
/// function is not compatible with the device-as-webcam service yet.
const MAPPINGS: [(u64, VidPid); 17] = [
    (mask(&[FunctionSet::MTP]), VidPid::saving(0x2717, 0xFF40, "2")),
    (mask(&[FunctionSet::ADB, FunctionSet::MTP]), VidPid::new(0x2717, 0xFF48)),
    (mask(&[FunctionSet::RNDIS]), VidPid::new(0x2717, 0xFF80)),
    (mask(&[FunctionSet::ADB, FunctionSet::RNDIS]), VidPid::new(0x2717, 0xFF88)),
    (mask(&[FunctionSet::PTP]), VidPid::saving(0x2717, 0xFF10, "2")),
    (mask(&[FunctionSet::ADB, FunctionSet::PTP]), VidPid::new(0x2717, 0xFF18)),
    (mask(&[FunctionSet::ADB]), VidPid::new(0x2717, 0xFF08)),
    (mask(&[FunctionSet::MIDI]), VidPid::new(0x2717, 0x2046)),
    (mask(&[FunctionSet::ADB, FunctionSet::MIDI]), VidPid::new(0x2717, 0x2048)),
    (mask(&[FunctionSet::ACCESSORY]), VidPid::new(0x18d1, 0x2d00)),
    (mask(&[FunctionSet::ADB, FunctionSet::ACCESSORY]), VidPid::new(0x18d1, 0x2d01)),
    (mask(&[FunctionSet::AUDIO_SOURCE]), VidPid::new(0x18d1, 0x2d02)),
    (mask(&[FunctionSet::ADB, FunctionSet::AUDIO_SOURCE]), VidPid::new(0x18d1, 0x2d03)),
    (
        mask(&[FunctionSet::ACCESSORY, FunctionSet::AUDIO_SOURCE]),
        VidPid::new(0x18d1, 0x2d04),
    ),
    (
        mask(&[FunctionSet::ADB, FunctionSet::ACCESSORY, FunctionSet::AUDIO_SOURCE]),
        VidPid::new(0x18d1, 0x2d05),
    ),
    (mask(&[FunctionSet::NCM]), VidPid::new(0x2717, 0x2067)),
    (mask(&[FunctionSet::ADB, FunctionSet::NCM]), VidPid::new(0x2717, 0x206A)),
];

/// Composition-to-identity resolver, built once per service
#[derive(Debug)]
pub struct VidPidTable {
    table: HashMap<u64, VidPid>,
}

impl VidPidTable {
    /// Build the table, applying the board's debug-mode alias for the
    /// ADB-only composition when configured.
    pub fn new(adb_debug_pid: Option<u16>) -> Self {
        let mut table: HashMap<u64, VidPid> = MAPPINGS.iter().copied().collect();
        if let Some(pid) = adb_debug_pid {
            if let Some(entry) = table.get_mut(&FunctionSet::ADB.0) {
                entry.product_id = pid;
            }
        }
        Self { table }
    }

    /// Resolve a function set to its USB identity
    pub fn resolve(&self, functions: FunctionSet) -> Result<VidPid> {
        self.table.get(&functions.0).copied().ok_or_else(|| {
            GadgetError::NotSupported(format!("no vid/pid mapping for [{functions}]"))
        })
    }
}

/// Resolve, write idVendor/idProduct, and apply the saving flag.
///
/// The saving write is best-effort: a failure is logged but does not fail
/// the apply sequence. No gadget linking happens here.
pub fn validate_and_set_vid_pid(
    table: &VidPidTable,
    cfg: &ConfigFsConfig,
    functions: FunctionSet,
) -> Result<VidPid> {
    let mapping = table.resolve(functions)?;

    write_file(
        &cfg.id_vendor_path(),
        &format!("0x{:04x}", mapping.vendor_id),
    )?;
    write_file(
        &cfg.id_product_path(),
        &format!("0x{:04x}", mapping.product_id),
    )?;

    if let Some(level) = mapping.saving {
        if let Err(e) = write_file(&cfg.saving_path, level) {
            warn!("Failed to update saving state: {}", e);
        }
    }

    Ok(mapping)
}
