use crate::device::{DeviceBus, DeviceIdentity, KnownDevices, UsbDevice, find_device};
use crate::device_ids::{MIDEX_PIDS, MIDEX_VID, UsbId, is_target};
use crate::observer::{Event, Observer};
use crate::payload::FirmwarePayload;
use crate::replay::{self, ReplayOptions};
use log::trace;
use std::thread::sleep;
use std::time::Duration;

/// Pause after every "add" event. A device re-enumerates while and after it is flashed, and those
/// notifications should not start another flash.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HotplugAction {
    Add,
    Remove,
}

/// A USB attach/detach notification. Only the action matters for deciding what to do; the rest is
/// for logging, since the device is looked up again anyway.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HotplugEvent {
    pub action: HotplugAction,
    pub bus: u8,
    pub address: u8,
    pub id: Option<UsbId>,
}

#[derive(Copy, Clone, Debug)]
pub struct WatchSettings {
    pub settle_delay: Duration,
    pub replay: ReplayOptions,
}

impl Default for WatchSettings {
    fn default() -> Self {
        WatchSettings {
            settle_delay: SETTLE_DELAY,
            replay: ReplayOptions::default(),
        }
    }
}

/// What happened in response to one event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Handled {
    /// Not an "add" event.
    Ignored,
    /// No MIDEX is connected; someone plugged in something else.
    NoDevice,
    LookupFailed,
    AlreadyKnown(DeviceIdentity),
    UpToDate(DeviceIdentity),
    Updated(DeviceIdentity),
    Failed(DeviceIdentity),
}

/// Flashes every legacy MIDEX that shows up, once per attachment.
pub struct Watcher<B: DeviceBus, O: Observer> {
    bus: B,
    payload: FirmwarePayload,
    settings: WatchSettings,
    known: KnownDevices,
    observer: O,
}

impl<B: DeviceBus, O: Observer> Watcher<B, O> {
    pub fn new(bus: B, payload: FirmwarePayload, observer: O) -> Self {
        Watcher {
            bus,
            payload,
            settings: WatchSettings::default(),
            known: KnownDevices::new(),
            observer,
        }
    }

    pub fn with_settings(self, settings: WatchSettings) -> Self {
        Watcher { settings, ..self }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn known(&self) -> &KnownDevices {
        &self.known
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Handle events until the source runs dry, waiting [WatchSettings::settle_delay] after each
    /// "add". A live monitor never runs dry; the process is ended by Ctrl-C instead.
    pub fn run<I: IntoIterator<Item = HotplugEvent>>(&mut self, events: I) {
        for event in events {
            if self.handle(&event) != Handled::Ignored {
                sleep(self.settings.settle_delay);
            }
        }
    }

    /// Handle a single event without any settle delay.
    pub fn handle(&mut self, event: &HotplugEvent) -> Handled {
        match event.action {
            HotplugAction::Add => {
                trace!(
                    "Device added at bus {:03} device {:03} ({:?})",
                    event.bus, event.address, event.id
                );
                self.check_devices()
            }
            HotplugAction::Remove => Handled::Ignored,
        }
    }

    /// Check for a MIDEX that was already connected before any event arrived.
    pub fn sweep(&mut self) -> Handled {
        self.check_devices()
    }

    fn check_devices(&mut self) -> Handled {
        let mut device = match find_device(&self.bus, MIDEX_VID, MIDEX_PIDS) {
            Ok(Some(device)) => device,
            Ok(None) => return Handled::NoDevice,
            Err(e) => {
                self.observer.notify(Event::LookupFailed(e));
                return Handled::LookupFailed;
            }
        };

        let identity = device.identity();
        if !self.known.remember(identity) {
            self.observer.notify(Event::AlreadyKnown(identity));
            return Handled::AlreadyKnown(identity);
        }

        self.observer.notify(Event::DeviceFound(identity));

        if is_target(identity.product_id) {
            self.observer.notify(Event::UpToDate(identity));
            return Handled::UpToDate(identity);
        }

        match replay::update(
            &mut device,
            &self.payload,
            &self.settings.replay,
            &mut self.observer,
        ) {
            Ok(_) => Handled::Updated(identity),
            Err(_) => Handled::Failed(identity),
        }
    }
}
