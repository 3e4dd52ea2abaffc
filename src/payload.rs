use log::{debug, warn};
use num_enum::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One captured control transfer: the setup packet plus the data the host sent with it. Field
/// names on disk follow the USB spec so payload files can be read next to a capture.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlTransferFrame {
    #[serde(rename = "bmRequestType")]
    pub request_type: u8,
    #[serde(rename = "bRequest")]
    pub request: u8,
    #[serde(rename = "wValue")]
    pub value: u16,
    #[serde(rename = "wIndex")]
    pub index: u16,
    #[serde(rename = "wLength")]
    pub length: u16,
    #[serde(rename = "data_fragment")]
    pub data: Vec<u8>,
}

impl ControlTransferFrame {
    pub fn request_type(&self) -> RequestType {
        RequestType::from(self.request_type)
    }

    /// An OUT frame is consistent when it carries exactly `wLength` bytes. IN frames carry no
    /// data of their own, so they always are.
    pub fn is_consistent(&self) -> bool {
        match self.request_type().direction {
            Direction::DeviceToHost => true,
            Direction::HostToDevice => self.data.len() == self.length as usize,
        }
    }
}

/// An ordered list of control transfers to replay to a device. Order is capture order and is
/// never changed once built.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FirmwarePayload(Vec<ControlTransferFrame>);

impl FirmwarePayload {
    pub fn frames(&self) -> &[ControlTransferFrame] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ControlTransferFrame> {
        self.0.iter()
    }

    /// CRC32 over every frame's setup fields and data. Two payloads with the same checksum send
    /// the same bytes in the same order.
    pub fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        for frame in &self.0 {
            hasher.update(&[frame.request_type, frame.request]);
            hasher.update(&frame.value.to_le_bytes());
            hasher.update(&frame.index.to_le_bytes());
            hasher.update(&frame.length.to_le_bytes());
            hasher.update(&frame.data);
        }
        hasher.finalize()
    }

    /// Total number of data bytes carried by all frames.
    pub fn data_len(&self) -> usize {
        self.0.iter().map(|f| f.data.len()).sum()
    }
}

impl From<Vec<ControlTransferFrame>> for FirmwarePayload {
    fn from(frames: Vec<ControlTransferFrame>) -> Self {
        FirmwarePayload(frames)
    }
}

impl<'a> IntoIterator for &'a FirmwarePayload {
    type Item = &'a ControlTransferFrame;
    type IntoIter = std::slice::Iter<'a, ControlTransferFrame>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Data stage direction, from bit 7 of `bmRequestType`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    HostToDevice,
    DeviceToHost,
}

/// Request type, from bits 5..6 of `bmRequestType`.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum RequestKind {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    #[num_enum(default)]
    Reserved = 3,
}

/// Request recipient, from bits 0..4 of `bmRequestType`.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
    #[num_enum(catch_all)]
    Reserved(u8),
}

/// Decoded `bmRequestType`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RequestType {
    pub direction: Direction,
    pub kind: RequestKind,
    pub recipient: Recipient,
}

impl From<u8> for RequestType {
    fn from(raw: u8) -> Self {
        RequestType {
            direction: match raw & 0x80 {
                0 => Direction::HostToDevice,
                _ => Direction::DeviceToHost,
            },
            kind: RequestKind::from((raw >> 5) & 0x03),
            recipient: Recipient::from(raw & 0x1f),
        }
    }
}

impl Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let dir = match self.direction {
            Direction::HostToDevice => "OUT",
            Direction::DeviceToHost => "IN",
        };
        write!(f, "{:?} {} to {:?}", self.kind, dir, self.recipient)
    }
}

/// Errors while reading or writing a payload file.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("payload file {0:?} doesn't exist")]
    NotFound(PathBuf),

    #[error("payload file {0:?} contains no transfers")]
    Empty(PathBuf),

    #[error("failed to read payload file {path:?}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("payload file {path:?} has bad format")]
    Format {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write payload file {path:?}")]
    WriteFailure {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Serialize `payload` as indented JSON. Frames are written in order, byte arrays as integers.
pub fn write(payload: &FirmwarePayload, writer: &mut impl Write) -> serde_json::Result<()> {
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(writer, formatter);
    payload.serialize(&mut ser)
}

/// Write `payload` to `path`, replacing any existing file.
pub fn save(payload: &FirmwarePayload, path: &Path) -> Result<(), Error> {
    let write_failure = |source| Error::WriteFailure {
        path: path.to_owned(),
        source,
    };

    let mut writer = BufWriter::new(File::create(path).map_err(write_failure)?);
    write(payload, &mut writer).map_err(|e| write_failure(e.into()))?;
    writer.flush().map_err(write_failure)?;

    debug!("Wrote {} frames to {path:?}", payload.len());
    Ok(())
}

/// Read a payload previously written by [save]. An empty payload is rejected, since replaying it
/// would do nothing.
pub fn load(path: &Path) -> Result<FirmwarePayload, Error> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.to_owned()));
        }
        Err(source) => {
            return Err(Error::Read {
                path: path.to_owned(),
                source,
            });
        }
    };

    let payload: FirmwarePayload =
        serde_json::from_reader(BufReader::new(file)).map_err(|source| Error::Format {
            path: path.to_owned(),
            source,
        })?;

    if payload.is_empty() {
        return Err(Error::Empty(path.to_owned()));
    }

    for (i, frame) in payload.iter().enumerate() {
        if !frame.is_consistent() {
            warn!(
                "Frame {i} declares wLength {} but carries {} bytes; sending as captured",
                frame.length,
                frame.data.len()
            );
        }
    }

    Ok(payload)
}
