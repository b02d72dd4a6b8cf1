//! Packet pacing for sensors sharing one network link.
//!
//! When N sensors share a switch uplink, each one staggers its packet emission by one
//! full packet transmission time per other sensor. Bursts from different sensors then
//! interleave instead of colliding in the switch buffers.

/// Default GigE jumbo packet size in bytes.
pub const DEFAULT_PACKET_SIZE_BYTES: u32 = 9000;

/// Default link speed in gigabits per second.
pub const DEFAULT_LINK_SPEED_GBPS: f64 = 1.0;

/// Ethernet header overhead added to every packet.
pub const ETHERNET_HEADER_BYTES: u32 = 14;

/// Link parameters the packet delay is derived from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PacingParams {
    pub packet_size_bytes: u32,
    pub link_speed_gbps: f64,
}

impl Default for PacingParams {
    fn default() -> Self {
        Self {
            packet_size_bytes: DEFAULT_PACKET_SIZE_BYTES,
            link_speed_gbps: DEFAULT_LINK_SPEED_GBPS,
        }
    }
}

impl PacingParams {
    /// Transmission time of one framed packet, in nanoseconds at the configured speed.
    pub fn transmission_time(&self) -> f64 {
        let frame_bytes = self.packet_size_bytes as f64 + ETHERNET_HEADER_BYTES as f64;
        frame_bytes * 8.0 / self.link_speed_gbps
    }

    /// Packet delay for one of `sensor_count` sensors sharing the link.
    pub fn packet_delay(&self, sensor_count: usize) -> u64 {
        if sensor_count <= 1 {
            return 0;
        }
        let others = (sensor_count - 1) as f64;
        // `as` saturates, so a degenerate link speed cannot wrap.
        (others * self.transmission_time()) as u64
    }
}

/// Compute the inter-source stagger for `sensor_count` sensors.
///
/// Must be called once per run with the number of successfully opened sessions,
/// before any session issues its start command.
pub fn compute_packet_delay(
    sensor_count: usize,
    packet_size_bytes: u32,
    link_speed_gbps: f64,
) -> u64 {
    PacingParams {
        packet_size_bytes,
        link_speed_gbps,
    }
    .packet_delay(sensor_count)
}
