use crate::device::UsbDevice;
use crate::device_ids::is_target;
use crate::observer::{Event, Observer};
use crate::payload::FirmwarePayload;
use std::thread::sleep;
use std::time::Duration;
use thiserror::Error;

/// Pause after every transfer so the device can process it before the next one arrives.
pub const TRANSFER_DELAY: Duration = Duration::from_millis(10);

pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(1);

/// Interface claimed by the kernel's audio/MIDI class driver.
const MIDI_INTERFACE: u8 = 0;

/// Timing for [update].
#[derive(Copy, Clone, Debug)]
pub struct ReplayOptions {
    /// Pause after every transfer.
    pub transfer_delay: Duration,
    /// Timeout for a single control transfer.
    pub timeout: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        ReplayOptions {
            transfer_delay: TRANSFER_DELAY,
            timeout: TRANSFER_TIMEOUT,
        }
    }
}

/// How a successful [update] ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Device already runs the target firmware; nothing was sent.
    UpToDate,
    /// Every transfer in the payload was sent.
    Updated {
        transfers: usize,
        /// Whether a kernel driver had to be detached first.
        detached: bool,
    },
}

/// Reasons an update can fail.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ReplayError {
    #[error("payload contains no transfers")]
    EmptyPayload,

    /// Transfers before `index` were sent and can't be taken back; none after it were attempted.
    #[error("USB transfer {index} failed: {source}")]
    TransportFailure { index: usize, source: rusb::Error },
}

/// Replay `payload` to `device`, one control transfer at a time and in order. Stops at the first
/// failed transfer without retrying, which can leave the device partially flashed.
pub fn update<D: UsbDevice + ?Sized>(
    device: &mut D,
    payload: &FirmwarePayload,
    options: &ReplayOptions,
    observer: &mut dyn Observer,
) -> Result<Outcome, ReplayError> {
    let identity = device.identity();
    if is_target(identity.product_id) {
        observer.notify(Event::UpToDate(identity));
        return Ok(Outcome::UpToDate);
    }

    if payload.is_empty() {
        let error = ReplayError::EmptyPayload;
        observer.notify(Event::UpdateFailed {
            device: identity,
            error: error.clone(),
        });
        return Err(error);
    }

    let total = payload.len();
    observer.notify(Event::UpdateStarted {
        device: identity,
        frames: total,
    });

    let detached = release_interface(device, MIDI_INTERFACE, observer);

    for (index, frame) in payload.iter().enumerate() {
        if let Err(source) = device.control_transfer(frame, options.timeout) {
            let error = ReplayError::TransportFailure { index, source };
            observer.notify(Event::UpdateFailed {
                device: identity,
                error: error.clone(),
            });
            return Err(error);
        }

        observer.notify(Event::FrameSent { index, total });
        sleep(options.transfer_delay);
    }

    observer.notify(Event::UpdateDone {
        device: identity,
        frames: total,
    });
    Ok(Outcome::Updated {
        transfers: total,
        detached,
    })
}

/// Detach the kernel driver from `interface` if it holds it. Failure is only reported, since the
/// transfers all go to endpoint 0 and may well work regardless.
fn release_interface<D: UsbDevice + ?Sized>(
    device: &mut D,
    interface: u8,
    observer: &mut dyn Observer,
) -> bool {
    let result = match device.kernel_driver_active(interface) {
        Ok(false) => {
            observer.notify(Event::DriverNotActive { interface });
            return false;
        }
        Ok(true) => device.detach_kernel_driver(interface),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            observer.notify(Event::DriverDetached { interface });
            true
        }
        Err(error) => {
            observer.notify(Event::DriverCheckFailed { interface, error });
            false
        }
    }
}
