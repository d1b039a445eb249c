use chrono::{DateTime, TimeZone, Utc};
use num_enum::TryFromPrimitive;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::eversolar::{
    CODE_E_TODAY, CODE_E_TOTAL_HI, CODE_E_TOTAL_LO, CODE_ERR_HI, CODE_ERR_LO, CODE_FAC,
    CODE_H_TOTAL_HI, CODE_H_TOTAL_LO, CODE_MODE, CODE_POWER, CODE_VAC, PV_CURRENT_CODES,
    PV_CURRENT_MAX_RAW, PV_VOLTAGE_CODES, RAW_SENTINEL,
};
use crate::utils::Utils;

/// Raw telemetry for one poll, in the order the device reported its codes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueTable(Vec<(u8, u16)>);

impl ValueTable {
    pub fn new(entries: Vec<(u8, u16)>) -> Self {
        Self(entries)
    }

    pub fn get(&self, code: u8) -> Option<u16> {
        self.0.iter().find(|(c, _)| *c == code).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(u8, u16)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ValueTable {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (code, value) in &self.0 {
            map.serialize_entry(&format!("{:#04x}", code), value)?;
        }
        map.end()
    }
}

/// Operating-mode word. Only the states the PMU is seen to report are
/// mapped; anything else stays raw in `Reading::mode`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, TryFromPrimitive)]
#[repr(u16)]
pub enum DeviceMode {
    Wait = 0x0000,
    Normal = 0x0001,
}

/// Decoded, scaled snapshot of one poll.
///
/// A field is `None` when the device did not report its source code(s);
/// zero is always a real measurement.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reading {
    pub inverter_id: String,
    pub power_w: Option<u16>,
    pub vac_v: Option<f64>,
    pub fac_hz: Option<f64>,
    pub e_today_kwh: Option<f64>,
    pub e_total_kwh: Option<f64>,
    pub h_total_hours: Option<u32>,
    pub mode: Option<u16>,
    pub pv_v: Option<f64>,
    pub pv_a: Option<f64>,
    pub pv_w_est: Option<f64>,
    pub error_flags: Option<u32>,
    pub device_epoch: Option<u32>,
    pub device_time_utc: Option<DateTime<Utc>>,
    pub time_delta_s: Option<i64>,
    pub raw: ValueTable,
}

impl Reading {
    pub fn device_mode(&self) -> Option<DeviceMode> {
        self.mode.and_then(|raw| DeviceMode::try_from(raw).ok())
    }
}

/// First candidate code that is present and plausible, in priority order.
/// Presence with an implausible value does not stop the scan.
fn select_raw(raw: &ValueTable, candidates: &[u8], plausible: impl Fn(u16) -> bool) -> Option<u16> {
    candidates
        .iter()
        .filter_map(|&code| raw.get(code))
        .find(|&value| plausible(value))
}

/// Assemble a scaled Reading from one poll's raw values.
pub fn decode_reading(
    inverter_id: &str,
    raw: ValueTable,
    device_epoch: Option<u32>,
    host_time: DateTime<Utc>,
) -> Reading {
    let power_w = raw.get(CODE_POWER);
    let vac_v = raw.get(CODE_VAC).map(|v| f64::from(v) / 10.0);
    let fac_hz = raw.get(CODE_FAC).map(|v| f64::from(v) / 100.0);
    let e_today_kwh = raw.get(CODE_E_TODAY).map(|v| f64::from(v) / 100.0);
    let mode = raw.get(CODE_MODE);

    let pv_v = select_raw(&raw, &PV_VOLTAGE_CODES, |v| v != 0 && v != RAW_SENTINEL)
        .map(|v| f64::from(v) / 10.0);

    let mut pv_a = select_raw(&raw, &PV_CURRENT_CODES, |v| {
        v != 0 && v != RAW_SENTINEL && v <= PV_CURRENT_MAX_RAW
    })
    .map(|v| f64::from(v) / 10.0);

    // no trustworthy current reading; derive one from power and voltage
    if pv_a.is_none() {
        if let (Some(volts), Some(watts)) = (pv_v, power_w) {
            if volts > 0.0 {
                pv_a = Some(Utils::round(f64::from(watts) / volts, 3));
            }
        }
    }

    let pv_w_est = match (pv_v, pv_a) {
        (Some(volts), Some(amps)) => Some(Utils::round(volts * amps, 1)),
        _ => None,
    };

    let e_total_kwh = match (raw.get(CODE_E_TOTAL_LO), raw.get(CODE_E_TOTAL_HI)) {
        (Some(lo), Some(hi)) => Some(Utils::round(
            f64::from(lo) / 10.0 + f64::from(hi) * 6553.6,
            1,
        )),
        _ => None,
    };

    let h_total_hours = match (raw.get(CODE_H_TOTAL_LO), raw.get(CODE_H_TOTAL_HI)) {
        (Some(lo), Some(hi)) => Some(u32::from(lo) + u32::from(hi) * 65536),
        _ => None,
    };

    let error_flags = match (raw.get(CODE_ERR_LO), raw.get(CODE_ERR_HI)) {
        (Some(lo), Some(hi)) => Some(u32::from(lo) | (u32::from(hi) << 16)),
        _ => None,
    };

    let device_time_utc =
        device_epoch.and_then(|epoch| Utc.timestamp_opt(i64::from(epoch), 0).single());
    let time_delta_s = device_time_utc.map(|device| (device - host_time).num_seconds());

    Reading {
        inverter_id: inverter_id.to_string(),
        power_w,
        vac_v,
        fac_hz,
        e_today_kwh,
        e_total_kwh,
        h_total_hours,
        mode,
        pv_v,
        pv_a,
        pv_w_est,
        error_flags,
        device_epoch,
        device_time_utc,
        time_delta_s,
        raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(u8, u16)]) -> ValueTable {
        ValueTable::new(entries.to_vec())
    }

    fn decode(entries: &[(u8, u16)]) -> Reading {
        decode_reading("ABCDEF1234567890", table(entries), None, Utils::utc())
    }

    #[test]
    fn scales_ac_fields() {
        let reading = decode(&[(0x44, 1000), (0x42, 2300), (0x43, 5000), (0x0D, 123)]);

        assert_eq!(reading.power_w, Some(1000));
        assert_eq!(reading.vac_v, Some(230.0));
        assert_eq!(reading.fac_hz, Some(50.0));
        assert_eq!(reading.e_today_kwh, Some(1.23));
    }

    #[test]
    fn absent_codes_stay_absent() {
        let reading = decode(&[(0x44, 0)]);

        // zero is a measurement, absence is not
        assert_eq!(reading.power_w, Some(0));
        assert_eq!(reading.vac_v, None);
        assert_eq!(reading.e_total_kwh, None);
        assert_eq!(reading.h_total_hours, None);
        assert_eq!(reading.error_flags, None);
        assert_eq!(reading.mode, None);
        assert_eq!(reading.pv_v, None);
        assert_eq!(reading.pv_a, None);
        assert_eq!(reading.pv_w_est, None);
    }

    #[test]
    fn pv_voltage_skips_implausible_candidates() {
        let reading = decode(&[(0x01, 0xFFFF), (0x02, 0), (0x40, 3005)]);
        assert_eq!(reading.pv_v, Some(300.5));
    }

    #[test]
    fn pv_current_respects_priority_and_magnitude() {
        let reading = decode(&[(0x41, 2001), (0x04, 80), (0x05, 90)]);
        assert_eq!(reading.pv_a, Some(8.0));
    }

    #[test]
    fn pv_current_falls_back_to_power_over_voltage() {
        let reading = decode(&[(0x01, 2000), (0x44, 1000)]);

        assert_eq!(reading.pv_v, Some(200.0));
        assert_eq!(reading.pv_a, Some(5.0));
        assert_eq!(reading.pv_w_est, Some(1000.0));
    }

    #[test]
    fn pv_fallback_needs_voltage_and_power() {
        let reading = decode(&[(0x44, 1000)]);
        assert_eq!(reading.pv_a, None);

        let reading = decode(&[(0x01, 2000)]);
        assert_eq!(reading.pv_a, None);
        assert_eq!(reading.pv_w_est, None);
    }

    #[test]
    fn e_total_combines_both_words() {
        let reading = decode(&[(0x47, 123), (0x48, 2)]);
        assert_eq!(reading.e_total_kwh, Some(13119.5));

        let reading = decode(&[(0x47, 123)]);
        assert_eq!(reading.e_total_kwh, None);
    }

    #[test]
    fn h_total_combines_both_words() {
        let reading = decode(&[(0x49, 100), (0x4A, 2)]);
        assert_eq!(reading.h_total_hours, Some(131_172));
    }

    #[test]
    fn error_flags_combine_low_and_high() {
        let reading = decode(&[(0x4D, 0x00FF), (0x4E, 0x0001)]);
        assert_eq!(reading.error_flags, Some(0x0001_00FF));
    }

    #[test]
    fn device_mode_maps_known_states() {
        assert_eq!(decode(&[(0x4C, 0)]).device_mode(), Some(DeviceMode::Wait));
        assert_eq!(decode(&[(0x4C, 1)]).device_mode(), Some(DeviceMode::Normal));

        let reading = decode(&[(0x4C, 7)]);
        assert_eq!(reading.device_mode(), None);
        assert_eq!(reading.mode, Some(7));
    }

    #[test]
    fn time_delta_truncates_toward_zero() {
        let host = Utc.timestamp_opt(1_700_000_030, 500_000_000).unwrap();
        let reading = decode_reading(
            "ABCDEF1234567890",
            table(&[]),
            Some(1_700_000_000),
            host,
        );

        assert_eq!(reading.device_epoch, Some(1_700_000_000));
        assert_eq!(reading.time_delta_s, Some(-30));
    }

    #[test]
    fn raw_table_serializes_with_hex_keys() {
        let reading = decode(&[(0x44, 1000)]);
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["raw"]["0x44"], 1000);
    }
}
