/**
 * The UUID of the motion service, which carries the accelerometer/gyroscope characteristic.
 */
pub const MOTION_SERVICE: &str = "49740000-0f51-43fc-be01-5ce169d39b47";

/**
 * The UUID of the characteristic that notifies 25 byte IMU frames.
 */
pub const IMU_CHARACTERISTIC: &str = "49740004-0f51-43fc-be01-5ce169d39b47";

/**
 * The standard BLE battery service.
 */
pub const BATTERY_SERVICE: &str = "0000180f-0000-1000-8000-00805f9b34fb";

/**
 * The standard BLE battery level characteristic.
 */
pub const BATTERY_CHARACTERISTIC: &str = "00002a19-0000-1000-8000-00805f9b34fb";

pub const LED_SERVICE: &str = "49730000-0f51-43fc-be01-5ce169d39b47";
pub const LED_RED_CHARACTERISTIC: &str = "49730001-0f51-43fc-be01-5ce169d39b47";
pub const LED_GREEN_CHARACTERISTIC: &str = "49730002-0f51-43fc-be01-5ce169d39b47";

pub const COMMAND_LED_ON: [u8; 1] = [0x01];
pub const COMMAND_LED_OFF: [u8; 1] = [0x00];

/**
 * Advertised name of the sensor. Used by the binary when no explicit address is requested.
 */
pub const SENSOR_DEVICE_NAME: &str = "Cadence_Sensor";

/**
 * Size of one IMU frame: 1 byte sequence index followed by six little-endian f32 values.
 */
pub const IMU_FRAME_LEN: usize = 25;

/**
 * Header row of the CSV telemetry log.
 */
pub const CSV_HEADER: &str = "Mac Address, Timestamp, index, Acc X, Acc Y, Acc Z, Gyro X, Gyro Y, Gyro Z";

/**
 * How many lines the telemetry log buffers before writing through to the file.
 */
pub const DEFAULT_LOG_BUFFER_LINES: usize = 128;

pub fn uuid_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_comparison_ignores_case() {
        assert!(uuid_eq(&IMU_CHARACTERISTIC.to_uppercase(), IMU_CHARACTERISTIC));
        assert!(!uuid_eq(BATTERY_CHARACTERISTIC, IMU_CHARACTERISTIC));
    }
}
