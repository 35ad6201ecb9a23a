/// Minimal Ethernet/IPv4 stack: ARP resolution and ICMP echo.
///
/// Every wait is a bounded poll: receive what is pending, handle it, then
/// sleep a fixed number of ticks. Inbound ARP always feeds the cache and
/// requests for our address are answered, whatever the caller is waiting
/// for at the time.
use log::{debug, info, warn};
use smoltcp::wire::{ArpOperation, ArpRepr, EthernetAddress, Ipv4Address};

use super::arp::ArpCache;
use super::config::{
    ARP_RETRIES, ARP_RETRY_TICKS, DEFAULT_TTL, IPV4_IDENT, LOCAL_IP, PING_IDENT, PING_RETRIES, PING_RETRY_TICKS,
    RX_BURST,
};
use super::device::NetDevice;
use super::wire::{self, Echo, EchoKind, Inbound, ARP_FRAME_LEN};
use super::NetError;
use crate::drivers::rtl8139::{NicError, MAX_FRAME_LEN};
use crate::time::Clock;

/// A matched echo reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub from: Ipv4Address,
    pub seq: u16,
    pub ttl: u8,
    /// Ticks between sending the request and seeing the reply.
    pub rtt_ticks: u64,
}

pub struct NetStack<D: NetDevice, C: Clock> {
    device: D,
    clock: C,
    arp: ArpCache,
    mac: EthernetAddress,
    ip: Ipv4Address,
    next_seq: u16,
}

impl<D: NetDevice, C: Clock> NetStack<D, C> {
    pub fn new(device: D, clock: C) -> Self {
        let mac = EthernetAddress(device.mac());
        Self { device, clock, arp: ArpCache::new(), mac, ip: LOCAL_IP, next_seq: 1 }
    }

    pub fn mac(&self) -> EthernetAddress {
        self.mac
    }

    pub fn ip(&self) -> Ipv4Address {
        self.ip
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn arp_cache(&self) -> &ArpCache {
        &self.arp
    }

    /// Raw frame transmit.
    pub fn send(&mut self, frame: &[u8]) -> Result<usize, NetError> {
        Ok(self.device.send(frame)?)
    }

    /// Raw frame receive, bypassing the protocol handlers.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        Ok(self.device.receive(buf)?)
    }

    /// Record `ip` at `mac` as of now. False if the cache is full.
    pub fn observe(&mut self, ip: Ipv4Address, mac: EthernetAddress) -> bool {
        let now = self.clock.now();
        self.arp.observe(ip, mac, now)
    }

    /// MAC address for `ip`: from the cache, or by broadcasting a request
    /// and polling `ARP_RETRIES` times.
    pub fn resolve(&mut self, ip: Ipv4Address) -> Result<EthernetAddress, NetError> {
        if let Some(mac) = self.arp.lookup(ip, self.clock.now()) {
            return Ok(mac);
        }

        debug!("who-has {} tell {}", ip, self.ip);
        let request = ArpRepr::EthernetIpv4 {
            operation: ArpOperation::Request,
            source_hardware_addr: self.mac,
            source_protocol_addr: self.ip,
            target_hardware_addr: EthernetAddress([0; 6]),
            target_protocol_addr: ip,
        };
        self.send_arp(EthernetAddress::BROADCAST, &request)?;

        let mut frame = [0u8; MAX_FRAME_LEN];
        for _ in 0..ARP_RETRIES {
            for _ in 0..RX_BURST {
                let Some(len) = self.receive_one(&mut frame) else {
                    break;
                };
                self.process(&frame[..len]);
                if let Some(mac) = self.arp.lookup(ip, self.clock.now()) {
                    info!("{} is at {}", ip, mac);
                    return Ok(mac);
                }
            }
            self.clock.delay(ARP_RETRY_TICKS);
        }

        warn!("no ARP reply from {}", ip);
        Err(NetError::ResolveTimeout)
    }

    /// Reply to an ARP request for our address. Returns whether a reply
    /// went out.
    pub fn answer_if_targeted(&mut self, request: &ArpRepr) -> Result<bool, NetError> {
        let ArpRepr::EthernetIpv4 {
            operation: ArpOperation::Request,
            source_hardware_addr,
            source_protocol_addr,
            target_protocol_addr,
            ..
        } = *request
        else {
            return Ok(false);
        };
        if target_protocol_addr != self.ip {
            return Ok(false);
        }

        let reply = ArpRepr::EthernetIpv4 {
            operation: ArpOperation::Reply,
            source_hardware_addr: self.mac,
            source_protocol_addr: self.ip,
            target_hardware_addr: source_hardware_addr,
            target_protocol_addr: source_protocol_addr,
        };
        self.send_arp(source_hardware_addr, &reply)?;
        debug!("told {} we are at {}", source_protocol_addr, self.mac);
        Ok(true)
    }

    /// Send one echo request to `dest` and wait for the reply.
    pub fn ping(&mut self, dest: Ipv4Address) -> Result<EchoReply, NetError> {
        let dst_mac = self.resolve(dest)?;

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        self.send_echo(&Echo {
            kind: EchoKind::Request,
            src_mac: self.mac,
            dst_mac,
            src_ip: self.ip,
            dst_ip: dest,
            ip_ident: IPV4_IDENT,
            ttl: DEFAULT_TTL,
            ident: PING_IDENT,
            seq,
            data: &[],
        })?;
        let sent_at = self.clock.now();

        let mut frame = [0u8; MAX_FRAME_LEN];
        for _ in 0..PING_RETRIES {
            for _ in 0..RX_BURST {
                let Some(len) = self.receive_one(&mut frame) else {
                    break;
                };
                let Some(reply) = self.process(&frame[..len]) else {
                    continue;
                };
                if reply.ident != PING_IDENT {
                    continue;
                }

                let reply = EchoReply {
                    from: reply.src_ip,
                    seq: reply.seq,
                    ttl: reply.ttl,
                    rtt_ticks: self.clock.now() - sent_at,
                };
                info!("reply from {}: icmp_seq={} ttl={}", reply.from, reply.seq, reply.ttl);
                return Ok(reply);
            }
            self.clock.delay(PING_RETRY_TICKS);
        }

        warn!("no echo reply from {}", dest);
        Err(NetError::PingTimeout)
    }

    /// Handle whatever is pending without waiting. Returns the number of
    /// frames processed.
    pub fn poll(&mut self) -> usize {
        let mut frame = [0u8; MAX_FRAME_LEN];
        let mut handled = 0;
        while handled < RX_BURST {
            let Some(len) = self.receive_one(&mut frame) else {
                break;
            };
            self.process(&frame[..len]);
            handled += 1;
        }
        handled
    }

    /// One receive attempt. Driver errors are logged and read as "nothing
    /// this time"; the driver has already recovered from them.
    fn receive_one(&mut self, buf: &mut [u8]) -> Option<usize> {
        match self.device.receive(buf) {
            Ok(0) => None,
            Ok(len) => Some(len),
            Err(e) if e.is_transient() => {
                debug!("receive: {}", e);
                None
            }
            Err(e) => {
                warn!("receive: {}", e);
                None
            }
        }
    }

    /// Run one inbound frame through the ARP and ICMP handlers. Echo
    /// replies addressed to us are handed back to the caller.
    fn process<'f>(&mut self, frame: &'f [u8]) -> Option<Echo<'f>> {
        match wire::parse(frame) {
            Inbound::Arp(arp) => {
                self.handle_arp(&arp);
                None
            }
            Inbound::Echo(echo) if echo.dst_ip != self.ip => None,
            Inbound::Echo(echo) => match echo.kind {
                EchoKind::Reply => Some(echo),
                EchoKind::Request => {
                    if let Err(e) = self.answer_echo(&echo) {
                        warn!("echo reply to {} failed: {}", echo.src_ip, e);
                    }
                    None
                }
            },
            Inbound::Other => None,
        }
    }

    fn handle_arp(&mut self, arp: &ArpRepr) {
        let ArpRepr::EthernetIpv4 { source_hardware_addr, source_protocol_addr, .. } = *arp else {
            return;
        };

        // Probes carry 0.0.0.0 as the sender; nothing to learn.
        if !source_protocol_addr.is_unspecified() && !self.observe(source_protocol_addr, source_hardware_addr) {
            debug!("ARP cache full, dropping {}", source_protocol_addr);
        }

        if let Err(e) = self.answer_if_targeted(arp) {
            warn!("ARP reply to {} failed: {}", source_protocol_addr, e);
        }
    }

    fn answer_echo(&mut self, request: &Echo<'_>) -> Result<(), NetError> {
        self.send_echo(&Echo {
            kind: EchoKind::Reply,
            src_mac: self.mac,
            dst_mac: request.src_mac,
            src_ip: self.ip,
            dst_ip: request.src_ip,
            ip_ident: request.ip_ident,
            ttl: DEFAULT_TTL,
            ident: request.ident,
            seq: request.seq,
            data: request.data,
        })
    }

    fn send_echo(&mut self, echo: &Echo<'_>) -> Result<(), NetError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = echo.emit(&mut buf).ok_or(NicError::FrameTooLarge(echo.frame_len()))?;
        self.device.send(&buf[..len])?;
        Ok(())
    }

    fn send_arp(&mut self, eth_dst: EthernetAddress, arp: &ArpRepr) -> Result<(), NetError> {
        let mut buf = [0u8; ARP_FRAME_LEN];
        wire::emit_arp(&mut buf, self.mac, eth_dst, arp);
        self.device.send(&buf)?;
        Ok(())
    }
}
