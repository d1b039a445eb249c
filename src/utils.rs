use chrono::{DateTime, Utc};

pub struct Utils;

impl Utils {
    /// Round to a fixed number of decimal places.
    pub fn round(value: f64, decimals: u32) -> f64 {
        let factor = 10u64.pow(decimals) as f64;
        (value * factor).round() / factor
    }

    pub fn utc() -> DateTime<Utc> {
        Utc::now()
    }
}
