use thiserror::Error;

use crate::controller_state::{ControllerState, PackedTemperatures};

/// A verbatim message to send which requests the 19 status registers starting at 0x0101.
///
/// Unit 1, function 3 (read holding registers), start 0x0101, count 0x0013, followed by
/// the precomputed MODBUS CRC of those six bytes.
pub const REQUEST: [u8; 8] = [0x01, 0x03, 0x01, 0x01, 0x00, 0x13, 0x54, 0x3b];

/// Number of registers requested by [`REQUEST`]
pub const REGISTER_COUNT: usize = 0x13;

/// The only payload length that can be decoded
pub const PAYLOAD_LEN: usize = REGISTER_COUNT * 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid response length: {actual} (expected {})", PAYLOAD_LEN)]
    InvalidLength { actual: usize },
}

/// Read big-endian register `index` and apply `scale`
fn register(data: &[u8], index: usize, scale: f32) -> f32 {
    let offset = index * 2;
    u16::from_be_bytes([data[offset], data[offset + 1]]) as f32 * scale
}

impl ControllerState {
    /// Decode the payload of a read-registers response.
    ///
    /// Registers 0, 11, 12, 13, 15, 17 and 18 are present but their meaning is unknown,
    /// so they are skipped.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() != PAYLOAD_LEN {
            return Err(DecodeError::InvalidLength { actual: payload.len() });
        }

        Ok(Self {
            battery_voltage_v: register(payload, 1, 0.1),
            battery_current_a: register(payload, 2, 0.01),
            battery_power_w: register(payload, 3, 1.0),
            temperatures: PackedTemperatures::unpack([payload[8], payload[9]]),
            load_voltage_v: register(payload, 5, 0.1),
            load_current_a: register(payload, 6, 0.01),
            load_power_w: register(payload, 7, 1.0),
            panel_voltage_v: register(payload, 8, 0.1),
            peak_power_today_w: register(payload, 9, 1.0),
            energy_production_today_wh: register(payload, 10, 1.0),
            days_running: register(payload, 14, 1.0),
            energy_production_lifetime_wh: register(payload, 16, 1.0),
        })
    }
}

#[cfg(test)]
pub(crate) const PAYLOAD_HEX: &str =
    "0000007b00050064321e0080001900030032009600c8000000000000000a0000138800000000";

#[cfg(test)]
fn assert_close(actual: f32, expected: f32) {
    assert!((actual - expected).abs() < 1e-4, "{actual} != {expected}");
}

#[test]
fn test_request_checksum_is_modbus_crc() {
    let crc = crc16::State::<crc16::MODBUS>::calculate(&REQUEST[..6]).to_le_bytes();
    assert_eq!(crc, [REQUEST[6], REQUEST[7]]);
}

#[test]
fn test_decode_happy() {
    let payload = hex::decode(PAYLOAD_HEX).unwrap();
    assert_eq!(payload.len(), PAYLOAD_LEN);

    let state = ControllerState::decode(&payload).unwrap();
    assert_close(state.battery_voltage_v, 12.3);
    assert_close(state.battery_current_a, 0.05);
    assert_close(state.battery_power_w, 100.0);
    assert_eq!(state.temperatures.controller_c, 50);
    assert_close(state.load_voltage_v, 12.8);
    assert_close(state.load_current_a, 0.25);
    assert_close(state.load_power_w, 3.0);
    assert_close(state.panel_voltage_v, 5.0);
    assert_close(state.peak_power_today_w, 150.0);
    assert_close(state.energy_production_today_wh, 200.0);
    assert_close(state.days_running, 10.0);
    assert_close(state.energy_production_lifetime_wh, 5000.0);
}

#[test]
fn test_decode_register_zero_is_not_battery_voltage() {
    // 0x007b sits in register 0, so it is skipped; register 1 holds 0x0005
    let payload =
        hex::decode("007b00050064321e00320019000f012c000000000000000000000000000a0000000013880000")
            .unwrap();
    let state = ControllerState::decode(&payload).unwrap();
    assert_close(state.battery_voltage_v, 0.5);
    assert_close(state.battery_current_a, 1.0);
    assert_close(state.battery_power_w, 12830.0);
    assert_eq!(state.temperatures, PackedTemperatures { controller_c: 0x00, external_c: 0x32 });
    assert_close(state.load_voltage_v, 2.5);
    assert_close(state.load_current_a, 0.15);
    assert_close(state.load_power_w, 300.0);
    assert_close(state.panel_voltage_v, 0.0);
    assert_close(state.peak_power_today_w, 0.0);
    assert_close(state.energy_production_today_wh, 0.0);
    assert_close(state.days_running, 10.0);
    assert_close(state.energy_production_lifetime_wh, 0.0);
}

#[test]
fn test_decode_yields_exactly_the_documented_channels() {
    use crate::controller_state::Channel;

    let payload = hex::decode(PAYLOAD_HEX).unwrap();
    let readings = ControllerState::decode(&payload).unwrap().readings();
    let channels: Vec<Channel> = readings.iter().map(|r| r.channel).collect();
    assert_eq!(channels, Channel::ALL.to_vec());
    let temperature = readings.iter().find(|r| r.channel == Channel::ControllerTemperature);
    assert_eq!(temperature.map(|r| r.value), Some(50.0));
}

#[test]
fn test_decode_ignores_unknown_registers() {
    let mut payload = hex::decode(PAYLOAD_HEX).unwrap();
    let expected = ControllerState::decode(&payload).unwrap();
    for index in [0, 11, 12, 13, 15, 17, 18] {
        payload[index * 2] = 0xff;
        payload[index * 2 + 1] = 0xff;
    }
    assert_eq!(ControllerState::decode(&payload).unwrap(), expected);
}

#[test]
fn test_decode_external_temperature_is_kept_separately() {
    let payload = hex::decode(PAYLOAD_HEX).unwrap();
    let state = ControllerState::decode(&payload).unwrap();
    assert_eq!(state.temperatures.external_c, 0x1e);
    assert_close(state.value(crate::controller_state::Channel::ControllerTemperature), 50.0);
}

#[test]
fn test_decode_wrong_length() {
    for len in [0, 1, 36, 37, 39, 40] {
        let payload = vec![0u8; len];
        assert_eq!(
            ControllerState::decode(&payload),
            Err(DecodeError::InvalidLength { actual: len })
        );
    }
}
