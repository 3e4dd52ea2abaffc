use crate::payload::{ControlTransferFrame, FirmwarePayload};
use log::{debug, trace};
use serde_json::Value;
use std::io::Read;
use std::str::FromStr;
use thiserror::Error;

/// Records at the start of every export that describe the capture itself rather than traffic.
const PREAMBLE_RECORDS: usize = 2;

const SRC_POINTER: &str = "/_source/layers/usb/usb.src";
const SETUP_POINTER: &str = "/_source/layers/Setup Data";

const REQUEST_TYPE: &str = "usb.bmRequestType";
const REQUEST: &str = "usb.setup.bRequest";
const VALUE: &str = "usb.setup.wValue";
const INDEX: &str = "usb.setup.wIndex";
const LENGTH: &str = "usb.setup.wLength";
const DATA: &str = "usb.data_fragment";

/// Reasons a capture can't be turned into a payload even though it is valid JSON.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ParseError {
    #[error("capture is not a list of packets; export it from Wireshark as JSON")]
    NotAnArray,

    #[error("capture contains no host-to-device setup packets")]
    Empty,

    #[error("record {record} has no {field:?} field")]
    MissingField { record: usize, field: &'static str },

    #[error("record {record} has invalid {field:?} value {value:?}")]
    InvalidField {
        record: usize,
        field: &'static str,
        value: String,
    },
}

/// All errors that can happen while reading a capture. I/O failures of the reader surface as
/// [Error::Json].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid capture")]
    Parse(#[from] ParseError),

    #[error("capture is not valid JSON")]
    Json(#[from] serde_json::Error),
}

/// Read a Wireshark JSON export and extract every control transfer the host sent, in capture
/// order. Any qualifying record that is missing a field fails the whole parse; nothing partial is
/// ever returned.
pub fn read(reader: impl Read) -> Result<FirmwarePayload, Error> {
    let records: Value = serde_json::from_reader(reader)?;
    parse(&records).map_err(Into::into)
}

/// Same as [read], for an already-decoded export.
pub fn parse(capture: &Value) -> Result<FirmwarePayload, ParseError> {
    let records = capture.as_array().ok_or(ParseError::NotAnArray)?;

    let mut frames = vec![];
    for (record, packet) in records.iter().enumerate().skip(PREAMBLE_RECORDS) {
        if packet.pointer(SRC_POINTER).and_then(Value::as_str) != Some("host") {
            continue;
        }

        let Some(setup) = packet.pointer(SETUP_POINTER) else {
            continue;
        };

        let frame = parse_setup(record, setup)?;
        trace!(
            "Record {record}: {} request {:#04x}, {} bytes",
            frame.request_type(),
            frame.request,
            frame.data.len()
        );
        frames.push(frame);
    }

    if frames.is_empty() {
        return Err(ParseError::Empty);
    }

    debug!("Kept {} of {} capture records", frames.len(), records.len());
    Ok(frames.into())
}

fn parse_setup(record: usize, setup: &Value) -> Result<ControlTransferFrame, ParseError> {
    let fields = Fields { record, setup };

    Ok(ControlTransferFrame {
        request_type: fields.hex(REQUEST_TYPE)?,
        request: fields.dec(REQUEST)?,
        value: fields.hex(VALUE)?,
        index: fields.dec(INDEX)?,
        length: fields.dec(LENGTH)?,
        data: fields.bytes(DATA)?,
    })
}

/// The "Setup Data" layer of one record. Wireshark exports every field as a string.
struct Fields<'a> {
    record: usize,
    setup: &'a Value,
}

impl<'a> Fields<'a> {
    fn get(&self, field: &'static str) -> Result<&'a str, ParseError> {
        match self.setup.get(field) {
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(other) => Err(self.invalid(field, &other.to_string())),
            None => Err(ParseError::MissingField {
                record: self.record,
                field,
            }),
        }
    }

    fn invalid(&self, field: &'static str, value: &str) -> ParseError {
        ParseError::InvalidField {
            record: self.record,
            field,
            value: value.to_owned(),
        }
    }

    fn hex<T: TryFrom<u32>>(&self, field: &'static str) -> Result<T, ParseError> {
        let s = self.get(field)?;
        parse_hex(s)
            .and_then(|v| T::try_from(v).ok())
            .ok_or_else(|| self.invalid(field, s))
    }

    fn dec<T: FromStr>(&self, field: &'static str) -> Result<T, ParseError> {
        let s = self.get(field)?;
        s.trim().parse().map_err(|_| self.invalid(field, s))
    }

    /// Colon-separated hex bytes, e.g. `"01:a0:ff"`.
    fn bytes(&self, field: &'static str) -> Result<Vec<u8>, ParseError> {
        let s = self.get(field)?;
        s.split(':')
            .map(|b| u8::from_str_radix(b.trim(), 16).ok())
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| self.invalid(field, s))
    }
}

/// Parse a hex field, with or without a `0x` prefix.
fn parse_hex(s: &str) -> Option<u32> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).ok()
}
