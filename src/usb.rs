use crate::device::{DeviceBus, DeviceIdentity, UsbDevice};
use crate::device_ids::UsbId;
use crate::payload::{ControlTransferFrame, Direction};
use crate::watch::{HotplugAction, HotplugEvent};
use log::{debug, error};
use rusb::{Context, Device, DeviceHandle, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::sleep;
use std::time::Duration;

/// How long [UsbMonitor] blocks in libusb before looking at the channel again.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Devices as libusb enumerates them.
pub struct RusbBus {
    context: Context,
}

impl RusbBus {
    pub fn new(context: Context) -> Self {
        RusbBus { context }
    }
}

impl DeviceBus for RusbBus {
    type Device = RusbDevice;

    fn open(&self, id: UsbId) -> rusb::Result<Option<RusbDevice>> {
        for device in self.context.devices()?.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    debug!(
                        "No descriptor for bus {:03} device {:03}: {e}",
                        device.bus_number(),
                        device.address()
                    );
                    continue;
                }
            };

            if descriptor.vendor_id() != id.vid || descriptor.product_id() != id.pid {
                continue;
            }

            let identity = DeviceIdentity {
                bus: device.bus_number(),
                address: device.address(),
                product_id: descriptor.product_id(),
            };
            let handle = device.open()?;
            return Ok(Some(RusbDevice { handle, identity }));
        }

        Ok(None)
    }
}

/// An opened libusb device.
pub struct RusbDevice {
    handle: DeviceHandle<Context>,
    identity: DeviceIdentity,
}

impl UsbDevice for RusbDevice {
    fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    fn kernel_driver_active(&self, interface: u8) -> rusb::Result<bool> {
        self.handle.kernel_driver_active(interface)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> rusb::Result<()> {
        self.handle.detach_kernel_driver(interface)
    }

    fn control_transfer(
        &mut self,
        frame: &ControlTransferFrame,
        timeout: Duration,
    ) -> rusb::Result<usize> {
        match frame.request_type().direction {
            Direction::HostToDevice => self.handle.write_control(
                frame.request_type,
                frame.request,
                frame.value,
                frame.index,
                &frame.data,
                timeout,
            ),
            // Whatever the device answers is discarded; only its acceptance of the request matters.
            Direction::DeviceToHost => {
                let mut buf = vec![0u8; frame.length as usize];
                self.handle.read_control(
                    frame.request_type,
                    frame.request,
                    frame.value,
                    frame.index,
                    &mut buf,
                    timeout,
                )
            }
        }
    }
}

/// Forwards libusb hotplug callbacks into a channel.
struct Forwarder(Sender<HotplugEvent>);

impl Forwarder {
    fn forward<T: UsbContext>(&self, action: HotplugAction, device: &Device<T>) {
        let id = device.device_descriptor().ok().map(|d| UsbId {
            vid: d.vendor_id(),
            pid: d.product_id(),
        });

        let event = HotplugEvent {
            action,
            bus: device.bus_number(),
            address: device.address(),
            id,
        };

        // The receiver lives in the monitor, which unregisters us before it is dropped.
        let _ = self.0.send(event);
    }
}

impl<T: UsbContext> Hotplug<T> for Forwarder {
    fn device_arrived(&mut self, device: Device<T>) {
        self.forward(HotplugAction::Add, &device);
    }

    fn device_left(&mut self, device: Device<T>) {
        self.forward(HotplugAction::Remove, &device);
    }
}

/// Endless, blocking stream of USB hotplug events.
pub struct UsbMonitor {
    _registration: Registration<Context>,
    context: Context,
    events: Receiver<HotplugEvent>,
}

impl UsbMonitor {
    pub fn new(context: Context) -> rusb::Result<Self> {
        if !rusb::has_hotplug() {
            return Err(rusb::Error::NotSupported);
        }

        let (sender, events) = mpsc::channel();
        let callback: Box<dyn Hotplug<Context>> = Box::new(Forwarder(sender));
        let registration = HotplugBuilder::new()
            .enumerate(false)
            .register(&context, callback)?;

        debug!("Hotplug callback registered");
        Ok(UsbMonitor {
            _registration: registration,
            context,
            events,
        })
    }
}

impl Iterator for UsbMonitor {
    type Item = HotplugEvent;

    fn next(&mut self) -> Option<HotplugEvent> {
        loop {
            if let Ok(event) = self.events.try_recv() {
                return Some(event);
            }

            match self.context.handle_events(Some(POLL_INTERVAL)) {
                Ok(()) | Err(rusb::Error::Interrupted) => {}
                Err(e) => {
                    error!("Failed to handle USB events: {e}");
                    sleep(POLL_INTERVAL);
                }
            }
        }
    }
}
