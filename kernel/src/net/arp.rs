/// ARP cache: fixed table of IPv4 → MAC mappings with age-based expiry.
///
/// At most one valid entry per address. New mappings take the first free
/// slot; with every slot valid and none matching, the update is dropped.
/// There is no eviction.
use smoltcp::wire::{EthernetAddress, Ipv4Address};

use super::config::{ARP_CACHE_SIZE, ARP_EXPIRY_TICKS};

#[derive(Debug, Clone, Copy)]
struct Entry {
    ip: Ipv4Address,
    mac: EthernetAddress,
    last_seen: u64,
    valid: bool,
}

impl Entry {
    const EMPTY: Entry = Entry {
        ip: Ipv4Address::UNSPECIFIED,
        mac: EthernetAddress([0; 6]),
        last_seen: 0,
        valid: false,
    };
}

pub struct ArpCache {
    entries: [Entry; ARP_CACHE_SIZE],
}

impl ArpCache {
    pub const fn new() -> Self {
        Self { entries: [Entry::EMPTY; ARP_CACHE_SIZE] }
    }

    /// Fresh mapping for `ip`. A stale entry is invalidated on the way.
    pub fn lookup(&mut self, ip: Ipv4Address, now: u64) -> Option<EthernetAddress> {
        let entry = self.entries.iter_mut().find(|e| e.valid && e.ip == ip)?;
        if now.saturating_sub(entry.last_seen) < ARP_EXPIRY_TICKS {
            Some(entry.mac)
        } else {
            entry.valid = false;
            None
        }
    }

    /// Record that `ip` is at `mac`. Returns false when the table is full.
    pub fn observe(&mut self, ip: Ipv4Address, mac: EthernetAddress, now: u64) -> bool {
        let slot = match self.entries.iter().position(|e| e.valid && e.ip == ip) {
            Some(i) => i,
            None => match self.entries.iter().position(|e| !e.valid) {
                Some(i) => i,
                None => return false,
            },
        };
        self.entries[slot] = Entry { ip, mac, last_seen: now, valid: true };
        true
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.valid).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new()
    }
}
