//! USB gadget function set and composition table

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GadgetError, Result};

/// Bitmask of requested USB gadget functions.
///
/// Bit values follow the Android gadget HAL so clients can pass raw masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionSet(pub u64);

impl FunctionSet {
    pub const NONE: FunctionSet = FunctionSet(0);
    pub const ADB: FunctionSet = FunctionSet(1 << 0);
    pub const ACCESSORY: FunctionSet = FunctionSet(1 << 1);
    pub const MTP: FunctionSet = FunctionSet(1 << 2);
    pub const MIDI: FunctionSet = FunctionSet(1 << 3);
    pub const PTP: FunctionSet = FunctionSet(1 << 4);
    pub const RNDIS: FunctionSet = FunctionSet(1 << 5);
    pub const AUDIO_SOURCE: FunctionSet = FunctionSet(1 << 6);
    pub const UVC: FunctionSet = FunctionSet(1 << 7);
    pub const NCM: FunctionSet = FunctionSet(1 << 10);

    pub fn contains(self, other: FunctionSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether a high-throughput tethering function is part of the set
    pub fn has_tethering(self) -> bool {
        self.contains(FunctionSet::RNDIS) || self.contains(FunctionSet::NCM)
    }

    pub const fn union(self, other: FunctionSet) -> FunctionSet {
        FunctionSet(self.0 | other.0)
    }

    /// Parse a function name as used by the control plane
    pub fn from_name(name: &str) -> Result<FunctionSet> {
        match name {
            "none" => Ok(FunctionSet::NONE),
            "adb" => Ok(FunctionSet::ADB),
            "accessory" => Ok(FunctionSet::ACCESSORY),
            "mtp" => Ok(FunctionSet::MTP),
            "midi" => Ok(FunctionSet::MIDI),
            "ptp" => Ok(FunctionSet::PTP),
            "rndis" => Ok(FunctionSet::RNDIS),
            "audio_source" => Ok(FunctionSet::AUDIO_SOURCE),
            "uvc" => Ok(FunctionSet::UVC),
            "ncm" => Ok(FunctionSet::NCM),
            other => Err(GadgetError::BadRequest(format!(
                "unknown USB function: {other}"
            ))),
        }
    }

    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<FunctionSet> {
        let mut set = FunctionSet::NONE;
        for name in names {
            set = set.union(FunctionSet::from_name(name)?);
        }
        Ok(set)
    }

    pub fn names(self) -> Vec<&'static str> {
        const ALL: [(FunctionSet, &str); 9] = [
            (FunctionSet::ADB, "adb"),
            (FunctionSet::ACCESSORY, "accessory"),
            (FunctionSet::MTP, "mtp"),
            (FunctionSet::MIDI, "midi"),
            (FunctionSet::PTP, "ptp"),
            (FunctionSet::RNDIS, "rndis"),
            (FunctionSet::AUDIO_SOURCE, "audio_source"),
            (FunctionSet::UVC, "uvc"),
            (FunctionSet::NCM, "ncm"),
        ];
        ALL.iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for FunctionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.names().join("|"))
    }
}

/// One entry of the composition table: a function flag and the configfs
/// directory it links as.
#[derive(Debug, Clone, Copy)]
pub struct FunctionEntry {
    pub flag: FunctionSet,
    /// ConfigFS function directory name (e.g. "ffs.adb")
    pub dir: &'static str,
    /// FunctionFS instance name for descriptor-bearing functions
    pub ffs_instance: Option<&'static str>,
}

/// Generic Android functions in their fixed link order.
///
/// Link order is part of the descriptor numbering contract with the host
/// side; entries must not be reordered. ADB and NCM are linked after these,
/// in that order.
pub const GENERIC_FUNCTIONS: [FunctionEntry; 6] = [
    FunctionEntry {
        flag: FunctionSet::MTP,
        dir: "ffs.mtp",
        ffs_instance: Some("mtp"),
    },
    FunctionEntry {
        flag: FunctionSet::PTP,
        dir: "ffs.ptp",
        ffs_instance: Some("ptp"),
    },
    FunctionEntry {
        flag: FunctionSet::MIDI,
        dir: "midi.gs5",
        ffs_instance: None,
    },
    FunctionEntry {
        flag: FunctionSet::ACCESSORY,
        dir: "accessory.gs2",
        ffs_instance: None,
    },
    FunctionEntry {
        flag: FunctionSet::AUDIO_SOURCE,
        dir: "audio_source.gs3",
        ffs_instance: None,
    },
    FunctionEntry {
        flag: FunctionSet::RNDIS,
        dir: "rndis.gs4",
        ffs_instance: None,
    },
];

/// ADB entry, always linked after the generic functions
pub const ADB_FUNCTION: FunctionEntry = FunctionEntry {
    flag: FunctionSet::ADB,
    dir: "ffs.adb",
    ffs_instance: Some("adb"),
};

/// NCM entry, always linked last
pub const NCM_FUNCTION: FunctionEntry = FunctionEntry {
    flag: FunctionSet::NCM,
    dir: "ncm.gs9",
    ffs_instance: None,
};

/// Vendor extra function directories for a composition selector.
///
/// Selectors are mutually exclusive; an unknown selector yields no extras.
pub fn vendor_extras(selector: &str) -> &'static [&'static str] {
    match selector {
        "diag" => &["diag.diag"],
        "diag,serial" => &["diag.diag", "acm.gs6"],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_and_union() {
        let set = FunctionSet::ADB.union(FunctionSet::NCM);
        assert!(set.contains(FunctionSet::ADB));
        assert!(set.contains(FunctionSet::NCM));
        assert!(!set.contains(FunctionSet::MTP));
        assert!(set.has_tethering());
        assert!(!FunctionSet::ADB.has_tethering());
    }

    #[test]
    fn test_parse_names() {
        let set = FunctionSet::from_names(["adb", "mtp"]).unwrap();
        assert_eq!(set, FunctionSet::ADB.union(FunctionSet::MTP));
        assert!(FunctionSet::from_name("floppy").is_err());
        assert_eq!(FunctionSet::from_name("none").unwrap(), FunctionSet::NONE);
    }

    #[test]
    fn test_display() {
        assert_eq!(FunctionSet::NONE.to_string(), "none");
        assert_eq!(
            FunctionSet::ADB.union(FunctionSet::RNDIS).to_string(),
            "adb|rndis"
        );
    }

    #[test]
    fn test_generic_order_is_stable() {
        let dirs: Vec<_> = GENERIC_FUNCTIONS.iter().map(|e| e.dir).collect();
        assert_eq!(
            dirs,
            [
                "ffs.mtp",
                "ffs.ptp",
                "midi.gs5",
                "accessory.gs2",
                "audio_source.gs3",
                "rndis.gs4"
            ]
        );
    }

    #[test]
    fn test_vendor_extras() {
        assert_eq!(vendor_extras("diag"), &["diag.diag"]);
        assert!(vendor_extras("").is_empty());
        assert!(vendor_extras("unknown").is_empty());
    }
}
