// For now, this only has information about the firmware,
// not the firmware itself.

// Keep these in sync with the nRF glove firmware.

use std::time::Duration;
use uuid::Uuid;

/// Name the glove advertises with (CONFIG_BT_DEVICE_NAME).
pub const DEVICE_NAME: &str = "ASL Glove Testing";

/// Hardware address the logger connects to without matching names.
pub const DEVICE_ADDRESS: &str = "E4:7C:2A:9B:51:0D";

pub const SENSOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x7e2a2b10_5b9a_4c8f_9d6a_2f6f2a4f8b01);
pub const SENSOR_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x7e2a2b11_5b9a_4c8f_9d6a_2f6f2a4f8b01);

pub const SCAN_TIMEOUT: Duration = Duration::from_secs(3);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Pause before looking at the service table a second time.
pub const SERVICE_DISCOVERY_DELAY: Duration = Duration::from_millis(500);

pub const LOG_PATH: &str = "glove_log.csv";

// Flex3 appears twice; this is what existing log files contain, so it stays.
pub const CSV_HEADER: [&str; 16] = [
    "t_s", "Flex1", "Flex2", "Flex3", "Flex3", "Flex4", "Flex5", "AccelX", "AccelY", "AccelZ",
    "GyroX", "GyroY", "GyroZ", "Pitch", "Roll", "Yaw",
];
