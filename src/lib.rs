/// Identify MIDEX devices and their firmware revision from USB IDs.
pub mod device_ids;

/// Extract a firmware payload from a Wireshark JSON export of the official updater's traffic.
pub mod capture;

/// Control transfer frames and the payload file format.
pub mod payload;

/// Find connected devices and remember which attachments were already handled.
pub mod device;

/// Replay a firmware payload to a connected device.
pub mod replay;

/// Watch for hotplugged devices and update them.
pub mod watch;

/// Report what the updater is doing.
pub mod observer;

/// libusb-backed device access and hotplug events.
pub mod usb;
