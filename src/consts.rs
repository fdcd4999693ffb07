// Wire constants shared with the indicator firmware.

use std::time::Duration;

/// Remote channel identifier (Discord snowflake).
pub type ChannelId = u64;

/// Device -> host: "I'm here, please acknowledge".
pub const HANDSHAKE_REQUEST: u8 = 0xFF;
/// Host -> device: acknowledgement of the handshake request.
pub const HANDSHAKE_ACK: u8 = 0xFA;
/// Device -> host: handshake finished.
pub const HANDSHAKE_DONE: u8 = 0x02;

/// Opcodes sent by the host. Separate namespace from `device_op`.
pub mod host_op {
    /// Set LED, followed by 0/1.
    pub const SET_LED: u8 = 0x01;
    /// Set relay, followed by 0/1.
    pub const SET_RELAY: u8 = 0x02;
    /// Relay write injected through the command socket, followed by 0/1.
    pub const REMOTE_RELAY: u8 = 0x03;
}

/// Event codes sent by the device, each followed by a press flag.
pub mod device_op {
    pub const TOGGLE: u8 = 0x01;
    pub const POWER_ON: u8 = 0x02;
    pub const POWER_OFF: u8 = 0x03;
}

/// Command socket opcodes.
pub mod peer_op {
    /// Followed by a single state byte.
    pub const RELAY: u8 = 0x01;
    /// Peer is going away.
    pub const CLOSE: u8 = 0x0A;
}

/// Channel name meaning "open".
pub const OPEN_NAME: &str = "shack-open";
/// Channel name meaning "closed".
pub const CLOSED_NAME: &str = "shack-closed";

/// Blink count for a press rejected by the cooldown.
pub const BLINKS_COOLDOWN: u32 = 2;
/// Blink count for a failed rename.
pub const BLINKS_REMOTE_FAILURE: u32 = 5;
/// Blink count acknowledging a confirmed power-on hold.
pub const BLINKS_CONFIRM: u32 = 1;
/// Half of one error blink cycle.
pub const BLINK_STEP: Duration = Duration::from_millis(200);

pub const DEFAULT_COMMAND_BIND: &str = "0.0.0.0:46099";

/// Software version
pub const GATE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GATE_NAME: &str = "shack-gate";
