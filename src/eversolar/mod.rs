// Eversolar PMU wire protocol: framing, payload codec, poll session.

pub mod client;
pub mod codec;
pub mod frame;
pub mod reading;

/// Sync marker opening every frame in both directions.
pub const SYNC: [u8; 2] = [0xAA, 0x55];

// Request commands. The PMU answers each with command + 1.
pub const CMD_INIT: u8 = 0x01;
pub const CMD_IDENTITY: u8 = 0x11;
pub const CMD_VALUES: u8 = 0x13;
pub const CMD_KEEPALIVE: u8 = 0x73;

// Identity query payloads: 0x00 returns the id and code list, 0x01 is the
// short form older firmware expects mid-session.
pub const IDENTITY_FULL: u8 = 0x00;
pub const IDENTITY_COMPAT: u8 = 0x01;

// Init/time payload layout.
pub const INIT_PAYLOAD_LEN: usize = 188;
pub const INIT_PREFIX: [u8; 4] = [0xA8, 0xFD, 0xFF, 0xFF];
pub const INIT_TRAILER: u16 = 0x0346;
pub const TZ_FIELD_LEN: usize = 84;

// Timezone labels embedded in the init payload. The PMU only displays these;
// the actual clock fields carry the configured local time.
pub const TZ_STANDARD_NAME: &str = "E. Australia Standard Time";
pub const TZ_DAYLIGHT_NAME: &str = "E. Australia Daylight Time";

pub const INVERTER_ID_LEN: usize = 16;

// A run of at least PAD_RUN zero bytes terminates the code list, but only
// once MIN_CODES real codes have been collected; a lone zero is a code.
pub const CODE_LIST_PAD_RUN: usize = 4;
pub const CODE_LIST_MIN_CODES: usize = 2;

// Values response layout: device epoch, then one u16 per reported code.
pub const EPOCH_OFFSET: usize = 2;
pub const VALUE_TABLE_OFFSET: usize = 8;
pub const VALUE_STRIDE: usize = 2;

// Telemetry codes with fixed meanings.
pub const CODE_POWER: u8 = 0x44;
pub const CODE_VAC: u8 = 0x42;
pub const CODE_FAC: u8 = 0x43;
pub const CODE_E_TODAY: u8 = 0x0D;
pub const CODE_MODE: u8 = 0x4C;
pub const CODE_E_TOTAL_LO: u8 = 0x47;
pub const CODE_E_TOTAL_HI: u8 = 0x48;
pub const CODE_H_TOTAL_LO: u8 = 0x49;
pub const CODE_H_TOTAL_HI: u8 = 0x4A;
pub const CODE_ERR_LO: u8 = 0x4D;
pub const CODE_ERR_HI: u8 = 0x4E;

// PV-side readings are spread over several redundant codes depending on
// firmware; candidates are tried in this order.
pub const PV_VOLTAGE_CODES: [u8; 3] = [0x01, 0x02, 0x40];
pub const PV_CURRENT_CODES: [u8; 4] = [0x41, 0x04, 0x05, 0x46];

/// Raw current readings above this are firmware garbage.
pub const PV_CURRENT_MAX_RAW: u16 = 2000;
/// Unpopulated slots read back as all-ones.
pub const RAW_SENTINEL: u16 = 0xFFFF;
