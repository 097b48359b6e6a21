//! Polling protocol report codec
//!
//! The DL24P's USB front end does not push data; the host polls it with
//! fixed-size 64-byte reports and the device answers in kind.
//!
//! # Report structure
//!
//! ```text
//! ┌────────┬─────────┬──────┬─────┬───────────────┬──────────┬─────────┐
//! │ Header │ Version │ Type │ Sub │    Payload    │ Checksum │ Trailer │
//! │  1 B   │  0x05   │ 1 B  │ 1 B │   bytes 4-60  │   1 B    │  EE FF  │
//! └────────┴─────────┴──────┴─────┴───────────────┴──────────┴─────────┘
//! ```
//!
//! Commands lead with 0x55, responses with 0xAA. The checksum covers type
//! through payload. Two response kinds exist: "live data" (settings and a
//! coarse voltage) and "counters" (the authoritative measurements); both
//! are needed for one full [`DeviceStatus`].

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tracing::trace;

use crate::{
    checksum,
    command::{Command, Mode},
    error::{Error, Result},
    status::DeviceStatus,
};

/// Report size in bytes, both directions
pub const REPORT_SIZE: usize = 64;

/// Command report header byte
pub const CMD_HEADER: u8 = 0x55;
/// Response report header byte
pub const RESP_HEADER: u8 = 0xAA;
/// Protocol version byte
pub const PROTO_VERSION: u8 = 0x05;
/// Report trailer
pub const TRAILER: [u8; 2] = [0xEE, 0xFF];

const PAYLOAD_START: usize = 4;
const CHECKSUM_OFFSET: usize = 61;
const MAX_PAYLOAD: usize = CHECKSUM_OFFSET - PAYLOAD_START;

const TYPE_QUERY: u8 = 0x01;
const TYPE_SET: u8 = 0x01;

// Query sub-commands
const SUB_LIVE_DATA: u8 = 0x03;
const SUB_COUNTERS: u8 = 0x05;
// Query argument captured from the vendor tool
const QUERY_ARG: u8 = 0x0B;

// Set sub-commands
const SUB_SET_CURRENT: u8 = 0x21;
const SUB_SET_BRIGHTNESS: u8 = 0x22;
const SUB_SET_STANDBY: u8 = 0x23;
const SUB_SET_MODE: u8 = 0x24;
const SUB_POWER: u8 = 0x25;
const SUB_SET_POWER: u8 = 0x26;
const SUB_SET_VOLTAGE: u8 = 0x27;
const SUB_SET_RESISTANCE: u8 = 0x28;
const SUB_SET_CUTOFF: u8 = 0x29;
const SUB_SET_DISCHARGE_TIME: u8 = 0x31;
const SUB_RESTORE_DEFAULTS: u8 = 0x32;
const SUB_RESET: u8 = 0x47;

// Counters runs a 48 Hz tick counter for runtime
const RUNTIME_TICKS_PER_SECOND: u32 = 48;

/// Status queries the poll loop issues every tick
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Query {
    /// Accumulated counters: the authoritative measurements
    Counters,
    /// Live data: setpoint, cutoff, mode, coarse voltage
    LiveData,
}

/// Decoded "live data" response
///
/// Payload offsets 4..20 hold uncharacterized calibration constants and are
/// deliberately not decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveData {
    /// Configured setpoint for the active mode
    pub value_set: f64,
    /// Temperature (Celsius)
    pub temperature_c: f64,
    /// Configured voltage cutoff (V)
    pub voltage_cutoff: f64,
    /// Active operating mode, when the code is recognized
    pub mode: Option<Mode>,
    /// Load-on bit from the flags byte
    pub load_on: bool,
    /// Coarse voltage reading (V, 10 mV resolution)
    pub voltage: f64,
}

/// Decoded "counters" response
#[derive(Debug, Clone, PartialEq)]
pub struct Counters {
    /// Voltage (V)
    pub voltage: f64,
    /// Current (A)
    pub current: f64,
    /// Power (W)
    pub power: f64,
    /// Capacity (mAh)
    pub capacity_mah: f64,
    /// Energy (Wh), approximated from capacity and voltage
    pub energy_wh: f64,
    /// Time the load has been sinking, in seconds
    pub runtime_seconds: u32,
    /// External probe temperature (Celsius)
    pub ext_temperature_c: f64,
    /// MOSFET temperature (Celsius)
    pub temperature_c: f64,
    /// Fan speed (RPM)
    pub fan_rpm: u16,
}

/// One decoded response report
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    LiveData(LiveData),
    Counters(Counters),
}

fn build_report(kind: u8, sub: u8, data: &[u8]) -> [u8; REPORT_SIZE] {
    let mut report = [0u8; REPORT_SIZE];
    report[0] = CMD_HEADER;
    report[1] = PROTO_VERSION;
    report[2] = kind;
    report[3] = sub;
    for (i, &b) in data.iter().enumerate().take(MAX_PAYLOAD) {
        report[PAYLOAD_START + i] = b;
    }
    report[CHECKSUM_OFFSET] = checksum::calculate(&report[2..CHECKSUM_OFFSET]);
    report[62] = TRAILER[0];
    report[63] = TRAILER[1];
    report
}

fn f32_be(value: f64) -> [u8; 4] {
    let mut buf = [0u8; 4];
    BigEndian::write_f32(&mut buf, value as f32);
    buf
}

/// Encode a status query report
pub fn encode_query(query: Query) -> [u8; REPORT_SIZE] {
    let sub = match query {
        Query::Counters => SUB_COUNTERS,
        Query::LiveData => SUB_LIVE_DATA,
    };
    build_report(TYPE_QUERY, sub, &[QUERY_ARG])
}

/// Encode a command into one or more reports
///
/// `SetMode` with a value produces two reports: the mode select followed by
/// the value write for that mode. `SetTimer` encodes as the equivalent
/// discharge timeout rounded up to whole minutes.
///
/// # Errors
///
/// Returns [`Error::Unsupported`] for `SetTimer` durations beyond the
/// 99 h 59 m discharge-timeout range. Every other command is expressible.
pub fn encode_command(cmd: &Command) -> Result<Vec<[u8; REPORT_SIZE]>> {
    let reports = match *cmd {
        Command::TurnOn => vec![build_report(TYPE_SET, SUB_POWER, &[0x01, 0, 0, 0])],
        Command::TurnOff => vec![build_report(TYPE_SET, SUB_POWER, &[0x00, 0, 0, 0])],
        Command::SetCurrent(amps) => {
            vec![build_report(TYPE_SET, SUB_SET_CURRENT, &f32_be(amps))]
        }
        Command::SetPower(watts) => {
            vec![build_report(TYPE_SET, SUB_SET_POWER, &f32_be(watts))]
        }
        Command::SetVoltage(volts) => {
            vec![build_report(TYPE_SET, SUB_SET_VOLTAGE, &f32_be(volts))]
        }
        Command::SetResistance(ohms) => {
            vec![build_report(TYPE_SET, SUB_SET_RESISTANCE, &f32_be(ohms))]
        }
        Command::SetVoltageCutoff(volts) => {
            vec![build_report(TYPE_SET, SUB_SET_CUTOFF, &f32_be(volts))]
        }
        Command::SetDischargeTime { hours, minutes } => {
            vec![discharge_time_report(hours, minutes)]
        }
        Command::SetTimer(seconds) => {
            let total_minutes = seconds.div_ceil(60);
            if total_minutes > 99 * 60 + 59 {
                return Err(Error::Unsupported("SET_TIMER"));
            }
            vec![discharge_time_report((total_minutes / 60) as u8, (total_minutes % 60) as u8)]
        }
        Command::ResetCounters => vec![build_report(TYPE_SET, SUB_RESET, &[0, 0, 0, 0])],
        Command::SetMode(mode, value) => {
            let mut reports = vec![build_report(TYPE_SET, SUB_SET_MODE, &[0, 0, 0, mode.into()])];
            if let Some(value) = value {
                let sub = match mode {
                    Mode::Cc => SUB_SET_CURRENT,
                    Mode::Cp => SUB_SET_POWER,
                    Mode::Cv => SUB_SET_VOLTAGE,
                    Mode::Cr => SUB_SET_RESISTANCE,
                };
                reports.push(build_report(TYPE_SET, sub, &f32_be(value)));
            }
            reports
        }
        Command::SetBrightness(level) => {
            let level = level.clamp(1, 9);
            vec![build_report(TYPE_SET, SUB_SET_BRIGHTNESS, &[0, 0, 0, level])]
        }
        Command::SetStandby(minutes) => {
            vec![build_report(TYPE_SET, SUB_SET_STANDBY, &[0, 0, 0, minutes])]
        }
        Command::RestoreDefaults => {
            vec![build_report(TYPE_SET, SUB_RESTORE_DEFAULTS, &[0, 0, 0, 0])]
        }
    };

    trace!(command = %cmd, reports = reports.len(), "Encoded polling command");

    Ok(reports)
}

fn discharge_time_report(hours: u8, minutes: u8) -> [u8; REPORT_SIZE] {
    let hours = hours.min(99);
    let minutes = minutes.min(59);
    let enable = u8::from(hours > 0 || minutes > 0);
    build_report(TYPE_SET, SUB_SET_DISCHARGE_TIME, &[hours, minutes, 0x00, enable])
}

/// Decode one 64-byte response report
///
/// # Errors
///
/// Returns an error on short input, wrong header/version/trailer, checksum
/// failure, or an unrecognized sub-command.
pub fn decode_response(report: &[u8]) -> Result<Response> {
    if report.len() < REPORT_SIZE {
        return Err(Error::TooShort {
            expected: REPORT_SIZE,
            actual: report.len(),
        });
    }
    if report[0] != RESP_HEADER || report[1] != PROTO_VERSION {
        return Err(Error::BadDelimiter);
    }
    if report[62..64] != TRAILER {
        return Err(Error::BadDelimiter);
    }

    let expected = checksum::calculate(&report[2..CHECKSUM_OFFSET]);
    let received = report[CHECKSUM_OFFSET];
    if received != expected {
        return Err(Error::ChecksumMismatch { expected, received });
    }

    let payload = &report[PAYLOAD_START..CHECKSUM_OFFSET];
    match report[3] {
        SUB_LIVE_DATA => Ok(Response::LiveData(parse_live_data(payload))),
        SUB_COUNTERS => Ok(Response::Counters(parse_counters(payload))),
        other => Err(Error::UnexpectedType(other)),
    }
}

fn parse_live_data(payload: &[u8]) -> LiveData {
    let f32_at = |offset: usize| f64::from(BigEndian::read_f32(&payload[offset..offset + 4]));

    LiveData {
        value_set: f32_at(0),
        temperature_c: f32_at(20),
        voltage_cutoff: f32_at(24),
        mode: Mode::try_from(payload[28]).ok(),
        load_on: payload[44] & 0x01 != 0,
        voltage: f64::from(BigEndian::read_u16(&payload[47..49])) / 100.0,
    }
}

fn parse_counters(payload: &[u8]) -> Counters {
    let u16_at = |offset: usize| LittleEndian::read_u16(&payload[offset..offset + 2]);

    let voltage_mv = u16_at(4);
    let current_ma = u16_at(8);
    let power_mw = u16_at(12);
    let capacity_uah = LittleEndian::read_u32(&payload[24..28]);
    let runtime_ticks = u16_at(28);
    let ext_temp_raw = u16_at(32);
    let mosfet_temp_raw = u16_at(36);
    let fan_rpm = u16_at(40);

    let voltage = f64::from(voltage_mv) / 1000.0;
    let capacity_mah = f64::from(capacity_uah) / 1000.0;

    Counters {
        voltage,
        current: f64::from(current_ma) / 1000.0,
        power: f64::from(power_mw) / 1000.0,
        capacity_mah,
        // No dedicated energy counter on the wire; derived from charge and
        // the present voltage
        energy_wh: capacity_mah / 1000.0 * voltage,
        runtime_seconds: u32::from(runtime_ticks) / RUNTIME_TICKS_PER_SECOND,
        ext_temperature_c: f64::from(ext_temp_raw) / 1000.0,
        temperature_c: f64::from(mosfet_temp_raw) / 1000.0,
        fan_rpm,
    }
}

/// Merge the two response kinds into one status snapshot
///
/// Counters are authoritative wherever both responses supply a value; live
/// data contributes the device settings and serves as the fallback for the
/// coarse voltage and load flag when a counters response was missed.
pub fn merge_status(live: Option<&LiveData>, counters: Option<&Counters>) -> Option<DeviceStatus> {
    if live.is_none() && counters.is_none() {
        return None;
    }

    let mut status = DeviceStatus::default();

    if let Some(live) = live {
        status.voltage = live.voltage;
        status.temperature_c = live.temperature_c;
        status.load_on = live.load_on;
        status.mode = live.mode;
        status.value_set = Some(live.value_set);
        status.voltage_cutoff = Some(live.voltage_cutoff);
    }

    if let Some(counters) = counters {
        status.voltage = counters.voltage;
        status.current = counters.current;
        status.power = counters.power;
        status.energy_wh = counters.energy_wh;
        status.capacity_mah = counters.capacity_mah;
        status.temperature_c = counters.temperature_c;
        status.ext_temperature_c = counters.ext_temperature_c;
        status.fan_rpm = counters.fan_rpm;
        // Current flow is the reliable on/off signal
        status.load_on = counters.current > 0.01;

        let runtime = counters.runtime_seconds;
        status.hours = (runtime / 3600) as u8;
        status.minutes = ((runtime % 3600) / 60) as u8;
        status.seconds = (runtime % 60) as u8;
    }

    status.temperature_f = status.temperature_c * 9.0 / 5.0 + 32.0;
    status.ext_temperature_f = status.ext_temperature_c * 9.0 / 5.0 + 32.0;

    Some(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Build a valid response report with the given sub-command and payload
    fn response_report(sub: u8, payload: &[u8]) -> [u8; REPORT_SIZE] {
        let mut report = [0u8; REPORT_SIZE];
        report[0] = RESP_HEADER;
        report[1] = PROTO_VERSION;
        report[2] = TYPE_QUERY;
        report[3] = sub;
        report[PAYLOAD_START..PAYLOAD_START + payload.len()].copy_from_slice(payload);
        report[CHECKSUM_OFFSET] = checksum::calculate(&report[2..CHECKSUM_OFFSET]);
        report[62] = TRAILER[0];
        report[63] = TRAILER[1];
        report
    }

    fn sample_counters_payload() -> [u8; MAX_PAYLOAD] {
        let mut payload = [0u8; MAX_PAYLOAD];
        // 4150 mV
        LittleEndian::write_u16(&mut payload[4..6], 4150);
        // 500 mA
        LittleEndian::write_u16(&mut payload[8..10], 500);
        // 2075 mW
        LittleEndian::write_u16(&mut payload[12..14], 2075);
        // 1200 mAh as uAh
        LittleEndian::write_u32(&mut payload[24..28], 1_200_000);
        // 96 ticks = 2 s
        LittleEndian::write_u16(&mut payload[28..30], 96);
        // 24.5 C external, 38.25 C mosfet
        LittleEndian::write_u16(&mut payload[32..34], 24_500);
        LittleEndian::write_u16(&mut payload[36..38], 38_250);
        // 2800 RPM
        LittleEndian::write_u16(&mut payload[40..42], 2800);
        payload
    }

    fn sample_live_payload() -> [u8; MAX_PAYLOAD] {
        let mut payload = [0u8; MAX_PAYLOAD];
        BigEndian::write_f32(&mut payload[0..4], 0.5);
        BigEndian::write_f32(&mut payload[20..24], 37.0);
        BigEndian::write_f32(&mut payload[24..28], 3.0);
        payload[28] = 0; // CC
        payload[44] = 0x01;
        BigEndian::write_u16(&mut payload[47..49], 415); // 4.15 V coarse
        payload
    }

    #[test]
    fn test_query_report_shape() {
        let report = encode_query(Query::Counters);

        assert_eq!(report.len(), REPORT_SIZE);
        assert_eq!(report[0], CMD_HEADER);
        assert_eq!(report[1], PROTO_VERSION);
        assert_eq!(report[2], TYPE_QUERY);
        assert_eq!(report[3], SUB_COUNTERS);
        assert_eq!(report[4], QUERY_ARG);
        assert_eq!(
            report[CHECKSUM_OFFSET],
            checksum::calculate(&report[2..CHECKSUM_OFFSET])
        );
        assert_eq!(&report[62..64], &TRAILER);
    }

    #[test]
    fn test_encode_set_current_float() {
        let reports = encode_command(&Command::SetCurrent(1.5)).unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0][3], SUB_SET_CURRENT);
        let value = BigEndian::read_f32(&reports[0][4..8]);
        assert_eq!(value, 1.5);
    }

    #[test]
    fn test_encode_set_mode_with_value() {
        let reports = encode_command(&Command::SetMode(Mode::Cp, Some(10.0))).unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0][3], SUB_SET_MODE);
        assert_eq!(reports[0][7], 1); // CP code
        assert_eq!(reports[1][3], SUB_SET_POWER);
        assert_eq!(BigEndian::read_f32(&reports[1][4..8]), 10.0);
    }

    #[test]
    fn test_encode_set_mode_bare() {
        let reports = encode_command(&Command::SetMode(Mode::Cr, None)).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0][7], 3);
    }

    #[test]
    fn test_encode_brightness_clamped() {
        let reports = encode_command(&Command::SetBrightness(12)).unwrap();
        assert_eq!(reports[0][3], SUB_SET_BRIGHTNESS);
        assert_eq!(reports[0][7], 9);
    }

    #[test]
    fn test_encode_discharge_time_enable_flag() {
        let reports = encode_command(&Command::SetDischargeTime { hours: 2, minutes: 15 }).unwrap();
        assert_eq!(&reports[0][4..8], &[2, 15, 0x00, 0x01]);

        let reports = encode_command(&Command::SetDischargeTime { hours: 0, minutes: 0 }).unwrap();
        assert_eq!(&reports[0][4..8], &[0, 0, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_timer_rounds_up() {
        // 90 s -> 2 minutes
        let reports = encode_command(&Command::SetTimer(90)).unwrap();
        assert_eq!(&reports[0][4..6], &[0, 2]);
    }

    #[test]
    fn test_decode_counters() {
        let report = response_report(SUB_COUNTERS, &sample_counters_payload());
        let Response::Counters(counters) = decode_response(&report).unwrap() else {
            panic!("expected counters response");
        };

        assert!((counters.voltage - 4.15).abs() < 1e-9);
        assert!((counters.current - 0.5).abs() < 1e-9);
        assert!((counters.power - 2.075).abs() < 1e-9);
        assert!((counters.capacity_mah - 1200.0).abs() < 1e-9);
        assert_eq!(counters.runtime_seconds, 2);
        assert!((counters.ext_temperature_c - 24.5).abs() < 1e-9);
        assert!((counters.temperature_c - 38.25).abs() < 1e-9);
        assert_eq!(counters.fan_rpm, 2800);
    }

    #[test]
    fn test_decode_live_data() {
        let report = response_report(SUB_LIVE_DATA, &sample_live_payload());
        let Response::LiveData(live) = decode_response(&report).unwrap() else {
            panic!("expected live data response");
        };

        assert_eq!(live.value_set, 0.5);
        assert_eq!(live.temperature_c, 37.0);
        assert_eq!(live.voltage_cutoff, 3.0);
        assert_eq!(live.mode, Some(Mode::Cc));
        assert!(live.load_on);
        assert!((live.voltage - 4.15).abs() < 1e-9);
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let mut report = response_report(SUB_COUNTERS, &sample_counters_payload());
        report[CHECKSUM_OFFSET] ^= 0xFF;

        assert!(matches!(
            decode_response(&report),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_bad_header() {
        let mut report = response_report(SUB_COUNTERS, &sample_counters_payload());
        report[0] = CMD_HEADER;

        assert!(matches!(decode_response(&report), Err(Error::BadDelimiter)));
    }

    #[test]
    fn test_merge_counters_override_live() {
        let report = response_report(SUB_LIVE_DATA, &sample_live_payload());
        let Response::LiveData(live) = decode_response(&report).unwrap() else {
            unreachable!()
        };
        let report = response_report(SUB_COUNTERS, &sample_counters_payload());
        let Response::Counters(counters) = decode_response(&report).unwrap() else {
            unreachable!()
        };

        let status = merge_status(Some(&live), Some(&counters)).unwrap();

        // Counters win on measurements
        assert!((status.voltage - 4.15).abs() < 1e-9);
        assert!((status.current - 0.5).abs() < 1e-9);
        assert!((status.temperature_c - 38.25).abs() < 1e-9);
        // Live data supplies the settings
        assert_eq!(status.mode, Some(Mode::Cc));
        assert_eq!(status.value_set, Some(0.5));
        assert_eq!(status.voltage_cutoff, Some(3.0));
        // Load flag derived from current flow
        assert!(status.load_on);
        assert_eq!(status.seconds, 2);
    }

    #[test]
    fn test_merge_live_only_falls_back() {
        let report = response_report(SUB_LIVE_DATA, &sample_live_payload());
        let Response::LiveData(live) = decode_response(&report).unwrap() else {
            unreachable!()
        };

        let status = merge_status(Some(&live), None).unwrap();

        assert!((status.voltage - 4.15).abs() < 1e-9);
        assert_eq!(status.current, 0.0);
        assert!(status.load_on); // flag bit, no counters to contradict it
    }

    #[test]
    fn test_merge_nothing() {
        assert_eq!(merge_status(None, None), None);
    }

    #[test]
    fn test_merge_zero_current_reads_off() {
        let mut payload = sample_counters_payload();
        LittleEndian::write_u16(&mut payload[8..10], 0);
        let report = response_report(SUB_COUNTERS, &payload);
        let Response::Counters(counters) = decode_response(&report).unwrap() else {
            unreachable!()
        };

        let status = merge_status(None, Some(&counters)).unwrap();
        assert!(!status.load_on);
    }
}
