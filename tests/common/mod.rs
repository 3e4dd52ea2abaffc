#![allow(dead_code)] // Each test binary uses a different subset.

use midex_update::device::{DeviceBus, DeviceIdentity, UsbDevice};
use midex_update::device_ids::{MIDEX_VID, UsbId};
use midex_update::observer::{Event, Observer};
use midex_update::payload::{ControlTransferFrame, FirmwarePayload};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Everything a [MockDevice] saw. Shared between every handle opened for the same device.
#[derive(Debug, Default)]
pub struct DeviceLog {
    /// Transfers that succeeded, in order.
    pub sent: Vec<ControlTransferFrame>,
    /// Transfers attempted, including a failed one.
    pub attempts: usize,
    pub detached: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct MockDevice {
    pub vid: u16,
    pub identity: DeviceIdentity,
    pub driver_active: bool,
    pub detach_error: Option<rusb::Error>,
    /// Index of the transfer that fails with [rusb::Error::Io].
    pub fail_at: Option<usize>,
    pub log: Rc<RefCell<DeviceLog>>,
}

impl MockDevice {
    pub fn midex(bus: u8, address: u8, product_id: u16) -> Self {
        MockDevice {
            vid: MIDEX_VID,
            identity: DeviceIdentity {
                bus,
                address,
                product_id,
            },
            driver_active: true,
            detach_error: None,
            fail_at: None,
            log: Rc::default(),
        }
    }

    pub fn failing_at(self, index: usize) -> Self {
        MockDevice {
            fail_at: Some(index),
            ..self
        }
    }

    pub fn sent(&self) -> Vec<ControlTransferFrame> {
        self.log.borrow().sent.clone()
    }

    pub fn attempts(&self) -> usize {
        self.log.borrow().attempts
    }

    pub fn detached(&self) -> Vec<u8> {
        self.log.borrow().detached.clone()
    }
}

impl UsbDevice for MockDevice {
    fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    fn kernel_driver_active(&self, _interface: u8) -> rusb::Result<bool> {
        Ok(self.driver_active)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        if let Some(e) = self.detach_error {
            return Err(e);
        }
        self.driver_active = false;
        self.log.borrow_mut().detached.push(interface);
        Ok(())
    }

    fn control_transfer(
        &mut self,
        frame: &ControlTransferFrame,
        _timeout: Duration,
    ) -> rusb::Result<usize> {
        let mut log = self.log.borrow_mut();
        let index = log.attempts;
        log.attempts += 1;

        if self.fail_at == Some(index) {
            return Err(rusb::Error::Io);
        }

        log.sent.push(frame.clone());
        Ok(frame.data.len())
    }
}

/// A set of connected devices that tests can plug and unplug between events.
#[derive(Default)]
pub struct MockBus {
    pub devices: RefCell<Vec<MockDevice>>,
    pub lookups: RefCell<Vec<UsbId>>,
    pub lookup_error: RefCell<Option<rusb::Error>>,
}

impl MockBus {
    pub fn with(devices: &[MockDevice]) -> Self {
        MockBus {
            devices: RefCell::new(devices.to_vec()),
            ..Default::default()
        }
    }

    pub fn plug(&self, device: MockDevice) {
        self.devices.borrow_mut().push(device);
    }

    pub fn unplug_all(&self) {
        self.devices.borrow_mut().clear();
    }

    pub fn fail_lookups(&self, error: Option<rusb::Error>) {
        *self.lookup_error.borrow_mut() = error;
    }
}

impl DeviceBus for MockBus {
    type Device = MockDevice;

    fn open(&self, id: UsbId) -> rusb::Result<Option<MockDevice>> {
        self.lookups.borrow_mut().push(id);
        if let Some(e) = *self.lookup_error.borrow() {
            return Err(e);
        }

        Ok(self
            .devices
            .borrow()
            .iter()
            .find(|d| d.vid == id.vid && d.identity.product_id == id.pid)
            .cloned())
    }
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub events: Vec<Event>,
}

impl RecordingObserver {
    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl Observer for RecordingObserver {
    fn notify(&mut self, event: Event) {
        self.events.push(event);
    }
}

/// `count` vendor OUT frames with distinct requests and a little data each.
pub fn payload(count: usize) -> FirmwarePayload {
    (0..count)
        .map(|i| ControlTransferFrame {
            request_type: 0x40,
            request: 0xa0,
            value: (i as u16) * 0x40,
            index: 0,
            length: 2,
            data: vec![i as u8, 0xff - i as u8],
        })
        .collect::<Vec<_>>()
        .into()
}
