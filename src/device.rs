use crate::device_ids::UsbId;
use crate::payload::ControlTransferFrame;
use log::debug;
use std::collections::HashSet;
use std::fmt::Display;
use std::time::Duration;

/// One physical attachment of a device. A re-plugged device usually comes back at a new address
/// and therefore with a new identity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub bus: u8,
    pub address: u8,
    pub product_id: u16,
}

impl Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{:#06x} on bus {:03} device {:03}",
            self.product_id, self.bus, self.address
        )
    }
}

/// An opened USB device, reduced to what a firmware replay needs.
pub trait UsbDevice {
    fn identity(&self) -> DeviceIdentity;

    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool>;

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()>;

    /// Issue the control transfer described by `frame` on endpoint 0 and return the number of
    /// bytes moved in the data stage.
    fn control_transfer(
        &mut self,
        frame: &ControlTransferFrame,
        timeout: Duration,
    ) -> rusb::Result<usize>;
}

/// Something that can look up and open connected devices.
pub trait DeviceBus {
    type Device: UsbDevice;

    /// Open the first connected device with the given ID, or return [None] if there isn't one.
    fn open(&self, id: UsbId) -> rusb::Result<Option<Self::Device>>;
}

/// Look for a device with vendor `vid` and any of `pids`, trying product IDs in the order given.
/// The first product ID with a connected device wins, even if a device with a later ID is also
/// connected.
pub fn find_device<B: DeviceBus>(
    bus: &B,
    vid: u16,
    pids: &[u16],
) -> rusb::Result<Option<B::Device>> {
    for &pid in pids {
        let id = UsbId { vid, pid };
        if let Some(device) = bus.open(id)? {
            debug!("Found {id} ({})", device.identity());
            return Ok(Some(device));
        }
    }

    Ok(None)
}

/// Every attachment handled so far. Only grows; entries live until the process exits.
#[derive(Debug, Default)]
pub struct KnownDevices(HashSet<DeviceIdentity>);

impl KnownDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, id: &DeviceIdentity) -> bool {
        self.0.contains(id)
    }

    /// Record `id`. Returns `false` if it was already known.
    pub fn remember(&mut self, id: DeviceIdentity) -> bool {
        self.0.insert(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
