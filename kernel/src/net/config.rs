/// Interface configuration for QEMU user-mode networking.
/// Guest 10.0.2.15, gateway 10.0.2.2. Nothing here is read at runtime.
use smoltcp::wire::Ipv4Address;

/// Used when the NIC reports an all-zero station address.
pub const FALLBACK_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];

pub const LOCAL_IP: Ipv4Address = Ipv4Address::new(10, 0, 2, 15);
pub const GATEWAY_IP: Ipv4Address = Ipv4Address::new(10, 0, 2, 2);

// ARP
pub const ARP_CACHE_SIZE: usize = 16;
/// Entries older than this are re-resolved (30 s).
pub const ARP_EXPIRY_TICKS: u64 = 300;
pub const ARP_RETRIES: u32 = 5;
pub const ARP_RETRY_TICKS: u64 = 2;

// Ping
pub const PING_RETRIES: u32 = 5;
pub const PING_RETRY_TICKS: u64 = 10;
pub const PING_IDENT: u16 = 0x4321;
pub const IPV4_IDENT: u16 = 0x1234;
pub const DEFAULT_TTL: u8 = 64;

/// Frames handled per poll attempt before waiting again.
pub const RX_BURST: usize = 8;
