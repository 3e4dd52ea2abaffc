use crate::device::DeviceIdentity;
use crate::device_ids::{MIDEX_VID, UsbId, identify_device};
use crate::replay::ReplayError;
use log::{debug, error, info, trace, warn};

/// Something worth telling the user about while watching for devices or flashing one.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A MIDEX attachment we have not handled before.
    DeviceFound(DeviceIdentity),
    /// A repeat notification for an attachment that was already handled.
    AlreadyKnown(DeviceIdentity),
    /// The device already runs the target firmware; nothing is sent.
    UpToDate(DeviceIdentity),
    UpdateStarted {
        device: DeviceIdentity,
        frames: usize,
    },
    DriverDetached {
        interface: u8,
    },
    DriverNotActive {
        interface: u8,
    },
    /// Querying or detaching the kernel driver failed. Transfers are attempted anyway.
    DriverCheckFailed {
        interface: u8,
        error: rusb::Error,
    },
    FrameSent {
        index: usize,
        total: usize,
    },
    UpdateDone {
        device: DeviceIdentity,
        frames: usize,
    },
    UpdateFailed {
        device: DeviceIdentity,
        error: ReplayError,
    },
    /// Enumerating or opening devices failed; the event is skipped.
    LookupFailed(rusb::Error),
}

/// Receives every [Event] the updater produces.
pub trait Observer {
    fn notify(&mut self, event: Event);
}

/// Reports events through the `log` facade.
#[derive(Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn notify(&mut self, event: Event) {
        use Event::*;

        match event {
            DeviceFound(dev) => {
                let id = UsbId {
                    vid: MIDEX_VID,
                    pid: dev.product_id,
                };
                match identify_device(id) {
                    Some(revision) => info!("New MIDEX found: {dev}, {revision} firmware"),
                    None => info!("New MIDEX found: {dev}"),
                }
            }
            AlreadyKnown(dev) => debug!("Already handled {dev}; ignoring"),
            UpToDate(dev) => info!("Firmware of {dev} is up to date; leaving it alone"),
            UpdateStarted { device, frames } => {
                info!("Updating firmware of {device} ({frames} transfers)")
            }
            DriverDetached { interface } => {
                info!("Detached kernel driver from interface {interface}")
            }
            DriverNotActive { interface } => {
                info!("Interface {interface} not used by the kernel")
            }
            DriverCheckFailed { interface, error } => {
                warn!("Can't release interface {interface} from the kernel ({error}); continuing")
            }
            FrameSent { index, total } => trace!("Sent transfer {}/{total}", index + 1),
            UpdateDone { device, frames } => {
                info!("Update of {device} done ({frames} transfers)")
            }
            UpdateFailed { device, error } => error!("Update of {device} failed: {error}"),
            LookupFailed(err) => error!("Failed to look up MIDEX devices: {err}"),
        }
    }
}
