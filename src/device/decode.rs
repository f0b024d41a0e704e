use std::fmt::Write;
use serde::{Deserialize, Serialize};

use crate::device::constants::IMU_FRAME_LEN;
use crate::device::types::ImuReading;
use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatteryDecoding {
    // bytes rendered as uppercase hex, then parsed as base-10: 0x19 reads as 19, 0x1A fails
    #[default]
    HexAsDecimal,
    // first byte is the level, as the standard battery service defines it
    RawByte,
}

fn read_f32(payload: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([payload[offset], payload[offset + 1], payload[offset + 2], payload[offset + 3]])
}

// [0] sequence index, then acc x/y/z and gyro x/y/z as little-endian f32 at offsets 1, 5, 9, 13, 17, 21
// bytes past the 25th are ignored
pub fn decode_imu(payload: &[u8]) -> Result<ImuReading, DecodeError> {
    if payload.len() < IMU_FRAME_LEN {
        return Err(DecodeError::Truncated { len: payload.len(), expected: IMU_FRAME_LEN });
    }

    Ok(ImuReading {
        sequence_index: payload[0],
        acc_x: read_f32(payload, 1),
        acc_y: read_f32(payload, 5),
        acc_z: read_f32(payload, 9),
        gyro_x: read_f32(payload, 13),
        gyro_y: read_f32(payload, 17),
        gyro_z: read_f32(payload, 21),
    })
}

pub fn decode_battery(payload: &[u8]) -> Result<u64, DecodeError> {
    decode_battery_with(payload, BatteryDecoding::HexAsDecimal)
}

pub fn decode_battery_with(payload: &[u8], decoding: BatteryDecoding) -> Result<u64, DecodeError> {
    match decoding {
        BatteryDecoding::HexAsDecimal => {
            let rendered = render_hex(payload);

            if rendered.is_empty() || !rendered.bytes().all(|b| b.is_ascii_digit()) {
                return Err(DecodeError::InvalidFormat { rendered });
            }

            // digits only, so the only remaining failure is overflow
            rendered.parse::<u64>().map_err(|_| DecodeError::InvalidFormat { rendered })
        },
        BatteryDecoding::RawByte => match payload.first() {
            Some(level) => Ok(u64::from(*level)),
            None => Err(DecodeError::Truncated { len: 0, expected: 1 }),
        },
    }
}

fn render_hex(payload: &[u8]) -> String {
    let mut rendered = String::with_capacity(payload.len() * 2);
    for byte in payload {
        // writing to a String cannot fail
        let _ = write!(rendered, "{:02X}", byte);
    }
    rendered
}
