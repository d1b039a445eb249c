use bytes::{BufMut, BytesMut};
use chrono::{Datelike, Timelike};
use log::debug;
use nom::multi::count;
use nom::number::complete::{le_u16, le_u32};

use crate::error::{Error, Result};
use crate::eversolar::reading::ValueTable;
use crate::eversolar::{
    CODE_LIST_MIN_CODES, CODE_LIST_PAD_RUN, EPOCH_OFFSET, INIT_PAYLOAD_LEN, INIT_PREFIX,
    INIT_TRAILER, INVERTER_ID_LEN, TZ_DAYLIGHT_NAME, TZ_FIELD_LEN, TZ_STANDARD_NAME,
    VALUE_STRIDE, VALUE_TABLE_OFFSET,
};

/// Encode the 188-byte init/time payload: constant prefix, the two UTF-16LE
/// timezone labels, then the wall-clock fields as little-endian u16s.
///
/// The length check is a structural self-check; a mismatch is a bug here,
/// not device behavior.
pub fn encode_time_payload<T>(now: &T) -> Result<Vec<u8>>
where
    T: Datelike + Timelike,
{
    let mut payload = BytesMut::with_capacity(INIT_PAYLOAD_LEN);
    payload.put_slice(&INIT_PREFIX);
    payload.put_slice(&timezone_field(TZ_STANDARD_NAME));
    payload.put_slice(&timezone_field(TZ_DAYLIGHT_NAME));

    // the device counts weekdays from Sunday
    let weekday = (now.weekday().num_days_from_monday() + 1) % 7;

    payload.put_u16_le(now.year() as u16);
    payload.put_u16_le(now.month() as u16);
    payload.put_u16_le(weekday as u16);
    payload.put_u16_le(now.day() as u16);
    payload.put_u16_le(now.hour() as u16);
    payload.put_u16_le(now.minute() as u16);
    payload.put_u16_le(now.second() as u16);
    payload.put_u16_le(INIT_TRAILER);

    if payload.len() != INIT_PAYLOAD_LEN {
        return Err(Error::Encoding(format!(
            "init payload is {} bytes, expected {}",
            payload.len(),
            INIT_PAYLOAD_LEN
        )));
    }

    Ok(payload.to_vec())
}

/// UTF-16LE, truncated or null-padded to the fixed field width.
fn timezone_field(name: &str) -> [u8; TZ_FIELD_LEN] {
    let mut field = [0u8; TZ_FIELD_LEN];
    let mut at = 0;
    for unit in name.encode_utf16() {
        if at + 2 > TZ_FIELD_LEN {
            break;
        }
        field[at..at + 2].copy_from_slice(&unit.to_le_bytes());
        at += 2;
    }
    field
}

/// Locate the first run of INVERTER_ID_LEN consecutive `[A-Z0-9]` bytes.
fn id_run(payload: &[u8]) -> Option<(usize, usize)> {
    let mut start = 0;
    let mut len = 0;
    for (at, &byte) in payload.iter().enumerate() {
        if byte.is_ascii_uppercase() || byte.is_ascii_digit() {
            if len == 0 {
                start = at;
            }
            len += 1;
            if len == INVERTER_ID_LEN {
                return Some((start, at + 1));
            }
        } else {
            len = 0;
        }
    }
    None
}

/// The identity response carries a 16-character alphanumeric inverter id at
/// no fixed offset; take the first such run.
pub fn decode_inverter_id(payload: &[u8]) -> Result<String> {
    let (start, end) =
        id_run(payload).ok_or_else(|| Error::Parse("inverter id not found".into()))?;
    Ok(String::from_utf8_lossy(&payload[start..end]).into_owned())
}

/// Telemetry codes follow the inverter id, one byte each, in the order the
/// value table will later use. 0x00 is a legitimate code; only a run of at
/// least CODE_LIST_PAD_RUN zeros after CODE_LIST_MIN_CODES collected codes
/// is treated as trailing padding.
pub fn decode_code_list(payload: &[u8]) -> Result<Vec<u8>> {
    let (_, end) = id_run(payload).ok_or_else(|| Error::Parse("inverter id not found".into()))?;
    let tail = &payload[end..];

    let mut codes = Vec::new();
    let mut at = 0;
    while at < tail.len() {
        let code = tail[at];
        if code == 0x00 {
            let zeros = tail[at..].iter().take_while(|&&b| b == 0x00).count();
            if zeros >= CODE_LIST_PAD_RUN && codes.len() >= CODE_LIST_MIN_CODES {
                debug!(
                    "code list ends after {} codes, {} bytes of padding",
                    codes.len(),
                    zeros
                );
                break;
            }
        }
        codes.push(code);
        at += 1;
    }

    if codes.is_empty() {
        return Err(Error::Parse("empty code list".into()));
    }
    Ok(codes)
}

/// Values sit at a fixed offset past the epoch field: one little-endian u16
/// per code, in device-reported code order.
pub fn decode_value_table(payload: &[u8], codes: &[u8]) -> Result<ValueTable> {
    let need = VALUE_TABLE_OFFSET + codes.len() * VALUE_STRIDE;
    if payload.len() < need {
        return Err(Error::Parse(format!(
            "payload too short: {} < {}",
            payload.len(),
            need
        )));
    }

    let (_, values) = count(le_u16::<_, nom::error::Error<&[u8]>>, codes.len())(
        &payload[VALUE_TABLE_OFFSET..],
    )
    .map_err(|_| Error::Parse("payload too short".into()))?;

    Ok(ValueTable::new(
        codes.iter().copied().zip(values).collect(),
    ))
}

/// Device clock as little-endian epoch seconds. A response too short to
/// carry one simply has no usable clock.
pub fn decode_device_epoch(payload: &[u8]) -> Option<u32> {
    let field = payload.get(EPOCH_OFFSET..EPOCH_OFFSET + 4)?;
    le_u32::<_, nom::error::Error<&[u8]>>(field)
        .ok()
        .map(|(_, epoch)| epoch)
}
