use std::fmt::Display;

/// Steinberg's USB vendor ID.
pub const MIDEX_VID: u16 = 0x0a4e;

/// Product ID reported once the device runs the updated firmware.
pub const TARGET_PID: u16 = 0x1001;

/// Every product ID we will talk to, in the order they are searched for. Everything before the
/// last entry is a legacy ID that needs an update; the last entry is [TARGET_PID].
pub const MIDEX_PIDS: &[u16] = &[0x1000, 0x1010, TARGET_PID];

/// A USB vendor ID and product ID pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl Display for UsbId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

/// Firmware a device runs, as far as its product ID tells us.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FirmwareRevision {
    Legacy,
    Target,
}

impl Display for FirmwareRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FirmwareRevision::Legacy => write!(f, "legacy"),
            FirmwareRevision::Target => write!(f, "up-to-date"),
        }
    }
}

/// Find a device's firmware revision based on its USB ID. Returns [None] for anything that is not
/// a MIDEX we know about; such devices are never touched.
pub fn identify_device(id: UsbId) -> Option<FirmwareRevision> {
    if id.vid != MIDEX_VID {
        return None;
    }

    match id.pid {
        TARGET_PID => Some(FirmwareRevision::Target),
        pid if MIDEX_PIDS.contains(&pid) => Some(FirmwareRevision::Legacy),
        _ => None,
    }
}

/// Whether a product ID already reports the updated firmware.
pub fn is_target(pid: u16) -> bool {
    pid == TARGET_PID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_is_last_candidate() {
        assert_eq!(MIDEX_PIDS.last(), Some(&TARGET_PID));
    }

    #[test]
    fn identifies_known_devices() {
        let id = |pid| UsbId { vid: MIDEX_VID, pid };
        assert_eq!(identify_device(id(0x1000)), Some(FirmwareRevision::Legacy));
        assert_eq!(identify_device(id(0x1010)), Some(FirmwareRevision::Legacy));
        assert_eq!(identify_device(id(0x1001)), Some(FirmwareRevision::Target));
        assert_eq!(identify_device(id(0x2000)), None);
    }

    #[test]
    fn ignores_other_vendors() {
        let id = UsbId {
            vid: 0x05a7,
            pid: TARGET_PID,
        };
        assert_eq!(identify_device(id), None);
    }

    #[test]
    fn formats_as_lsusb() {
        let id = UsbId {
            vid: MIDEX_VID,
            pid: 0x1000,
        };
        assert_eq!(id.to_string(), "0a4e:1000");
    }
}
