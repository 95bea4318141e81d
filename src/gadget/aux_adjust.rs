//! Best-effort post-apply adjustments
//!
//! Both of these run after a successful apply and never affect its result:
//! failures are logged and swallowed by the caller.

use std::path::Path;

use tracing::debug;

use super::configfs::{read_file, write_file};
use crate::config::{IrqConfig, PowerConfig};
use crate::error::{GadgetError, Result};

/// Steer the USB controller's interrupt to a bigger core while a
/// high-throughput tethering function is active.
pub fn steer_irq_affinity(cfg: &IrqConfig, tethering: bool) -> Result<()> {
    let irq = find_controller_irq(&cfg.interrupts_path, &cfg.controller)?.ok_or_else(|| {
        GadgetError::NotAvailable(format!("no interrupt line matching {}", cfg.controller))
    })?;

    let core = if tethering {
        &cfg.big_core
    } else {
        &cfg.medium_core
    };

    let affinity_path = cfg
        .irq_root
        .join(irq.to_string())
        .join("smp_affinity_list");
    write_file(&affinity_path, core)?;
    debug!("Steered irq {} to cpu {}", irq, core);
    Ok(())
}

/// Scan the kernel interrupt table for the controller's IRQ number.
///
/// Lines look like ` 123:   0   0  GICv3 ... 11110000.dwc3`; the number
/// before the colon is the IRQ.
fn find_controller_irq(interrupts_path: &Path, controller: &str) -> Result<Option<u32>> {
    let table = std::fs::read_to_string(interrupts_path)
        .map_err(|e| GadgetError::configfs(interrupts_path, e))?;

    for line in table.lines() {
        if !line.contains(controller) {
            continue;
        }
        let Some(head) = line.trim_start().split(':').next() else {
            continue;
        };
        if let Ok(irq) = head.trim().parse::<u32>() {
            return Ok(Some(irq));
        }
    }
    Ok(None)
}

/// Raise the charger current limit for accessory mode.
///
/// Only applies when the charger enumerated as a standard downstream port
/// and the Type-C port sits in default power mode; higher-power contracts
/// already negotiated their own limit.
pub fn limit_accessory_current(cfg: &PowerConfig) -> Result<()> {
    let usb_type = read_file(&cfg.usb_type_path)?;
    let power_mode = read_file(&cfg.power_mode_path)?;

    if selected_type(&usb_type) != "SDP" {
        debug!("Charger type [{}] keeps its negotiated limit", usb_type);
        return Ok(());
    }
    if power_mode != "default" {
        debug!("Power mode [{}] keeps its negotiated limit", power_mode);
        return Ok(());
    }

    write_file(&cfg.current_max_path, &cfg.accessory_current_ua)?;
    debug!("Accessory current limit set to {}uA", cfg.accessory_current_ua);
    Ok(())
}

/// The active charger type is the bracketed entry of the usb_type attribute
/// (`SDP [CDP] DCP`); single-valued kernels report it bare.
fn selected_type(usb_type: &str) -> &str {
    if let Some(start) = usb_type.find('[') {
        if let Some(end) = usb_type[start..].find(']') {
            return &usb_type[start + 1..start + end];
        }
    }
    usb_type.trim()
}
