/// Frame building and parsing for the protocols the stack speaks:
/// Ethernet II, ARP (Ethernet/IPv4), IPv4 without options, ICMP echo.
///
/// Layout and byte order go through smoltcp's zero-copy packet accessors;
/// every field is network byte order on the wire. Checksums are computed
/// with `net::checksum` over the bytes exactly as transmitted.
use smoltcp::wire::{
    ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol, EthernetRepr, Icmpv4Message,
    Icmpv4Packet, IpProtocol, Ipv4Address, Ipv4Packet,
};

use super::checksum::checksum;

pub const ETH_HEADER_LEN: usize = 14;
pub const IPV4_HEADER_LEN: usize = 20;
pub const ICMP_HEADER_LEN: usize = 8;
pub const ARP_LEN: usize = 28;

/// Ethernet + ARP.
pub const ARP_FRAME_LEN: usize = ETH_HEADER_LEN + ARP_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoKind {
    Request,
    Reply,
}

/// An ICMP echo datagram with the Ethernet and IPv4 fields the stack
/// cares about. `data` borrows the frame it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Echo<'a> {
    pub kind: EchoKind,
    pub src_mac: EthernetAddress,
    pub dst_mac: EthernetAddress,
    pub src_ip: Ipv4Address,
    pub dst_ip: Ipv4Address,
    /// IPv4 identification.
    pub ip_ident: u16,
    pub ttl: u8,
    pub ident: u16,
    pub seq: u16,
    pub data: &'a [u8],
}

impl Echo<'_> {
    pub fn frame_len(&self) -> usize {
        ETH_HEADER_LEN + IPV4_HEADER_LEN + ICMP_HEADER_LEN + self.data.len()
    }

    /// Write the whole frame, both checksums filled in. `None` if `buf`
    /// is too short.
    pub fn emit(&self, buf: &mut [u8]) -> Option<usize> {
        let len = self.frame_len();
        let buf = buf.get_mut(..len)?;

        let mut frame = EthernetFrame::new_unchecked(&mut *buf);
        EthernetRepr { src_addr: self.src_mac, dst_addr: self.dst_mac, ethertype: EthernetProtocol::Ipv4 }
            .emit(&mut frame);

        let ip_bytes = &mut buf[ETH_HEADER_LEN..];
        let mut ip = Ipv4Packet::new_unchecked(&mut *ip_bytes);
        ip.set_version(4);
        ip.set_header_len(IPV4_HEADER_LEN as u8);
        ip.set_dscp(0);
        ip.set_ecn(0);
        ip.set_total_len((len - ETH_HEADER_LEN) as u16);
        ip.set_ident(self.ip_ident);
        ip.clear_flags();
        ip.set_frag_offset(0);
        ip.set_hop_limit(self.ttl);
        ip.set_next_header(IpProtocol::Icmp);
        ip.set_src_addr(self.src_ip);
        ip.set_dst_addr(self.dst_ip);
        ip.set_checksum(0);
        let sum = checksum(&ip_bytes[..IPV4_HEADER_LEN]);
        Ipv4Packet::new_unchecked(&mut *ip_bytes).set_checksum(sum);

        let icmp_bytes = &mut ip_bytes[IPV4_HEADER_LEN..];
        let mut icmp = Icmpv4Packet::new_unchecked(&mut *icmp_bytes);
        icmp.set_msg_type(match self.kind {
            EchoKind::Request => Icmpv4Message::EchoRequest,
            EchoKind::Reply => Icmpv4Message::EchoReply,
        });
        icmp.set_msg_code(0);
        icmp.set_echo_ident(self.ident);
        icmp.set_echo_seq_no(self.seq);
        icmp.set_checksum(0);
        icmp_bytes[ICMP_HEADER_LEN..].copy_from_slice(self.data);
        let sum = checksum(icmp_bytes);
        Icmpv4Packet::new_unchecked(&mut *icmp_bytes).set_checksum(sum);

        Some(len)
    }
}

/// Write an ARP frame.
pub fn emit_arp(
    buf: &mut [u8; ARP_FRAME_LEN],
    eth_src: EthernetAddress,
    eth_dst: EthernetAddress,
    arp: &ArpRepr,
) {
    let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
    EthernetRepr { src_addr: eth_src, dst_addr: eth_dst, ethertype: EthernetProtocol::Arp }.emit(&mut frame);
    arp.emit(&mut ArpPacket::new_unchecked(frame.payload_mut()));
}

/// What an inbound frame turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    Arp(ArpRepr),
    Echo(Echo<'a>),
    /// Anything else, including malformed or bad-checksum frames.
    Other,
}

pub fn parse(frame: &[u8]) -> Inbound<'_> {
    let Ok(eth) = EthernetFrame::new_checked(frame) else {
        return Inbound::Other;
    };

    match eth.ethertype() {
        EthernetProtocol::Arp => ArpPacket::new_checked(&frame[ETH_HEADER_LEN..])
            .and_then(|packet| ArpRepr::parse(&packet))
            .map_or(Inbound::Other, Inbound::Arp),
        EthernetProtocol::Ipv4 => {
            parse_echo(frame, eth.src_addr(), eth.dst_addr()).map_or(Inbound::Other, Inbound::Echo)
        }
        _ => Inbound::Other,
    }
}

/// IPv4 + ICMP echo. Fragments are not reassembled and are ignored.
fn parse_echo(frame: &[u8], src_mac: EthernetAddress, dst_mac: EthernetAddress) -> Option<Echo<'_>> {
    let ip_bytes = &frame[ETH_HEADER_LEN..];
    let ip = Ipv4Packet::new_checked(ip_bytes).ok()?;
    if ip.version() != 4 || ip.next_header() != IpProtocol::Icmp {
        return None;
    }
    if ip.more_frags() || ip.frag_offset() != 0 {
        return None;
    }

    let header_len = ip.header_len() as usize;
    if checksum(&ip_bytes[..header_len]) != 0 {
        return None;
    }

    // Trailing Ethernet padding is not part of the datagram.
    let icmp_bytes = &ip_bytes[header_len..ip.total_len() as usize];
    let icmp = Icmpv4Packet::new_checked(icmp_bytes).ok()?;
    if icmp_bytes.len() < ICMP_HEADER_LEN || icmp.msg_code() != 0 || checksum(icmp_bytes) != 0 {
        return None;
    }
    let kind = match icmp.msg_type() {
        Icmpv4Message::EchoRequest => EchoKind::Request,
        Icmpv4Message::EchoReply => EchoKind::Reply,
        _ => return None,
    };

    Some(Echo {
        kind,
        src_mac,
        dst_mac,
        src_ip: ip.src_addr(),
        dst_ip: ip.dst_addr(),
        ip_ident: ip.ident(),
        ttl: ip.hop_limit(),
        ident: icmp.echo_ident(),
        seq: icmp.echo_seq_no(),
        data: &icmp_bytes[ICMP_HEADER_LEN..],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use smoltcp::wire::ArpOperation;

    const OUR_MAC: EthernetAddress = EthernetAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
    const PEER_MAC: EthernetAddress = EthernetAddress([0x52, 0x55, 0x0a, 0x00, 0x02, 0x02]);
    const OUR_IP: Ipv4Address = Ipv4Address::new(10, 0, 2, 15);
    const PEER_IP: Ipv4Address = Ipv4Address::new(10, 0, 2, 2);

    fn request(data: &[u8]) -> Echo<'_> {
        Echo {
            kind: EchoKind::Request,
            src_mac: OUR_MAC,
            dst_mac: PEER_MAC,
            src_ip: OUR_IP,
            dst_ip: PEER_IP,
            ip_ident: 0x1234,
            ttl: 64,
            ident: 0x4321,
            seq: 1,
            data,
        }
    }

    #[test]
    fn echo_request_byte_layout() {
        let mut buf = [0u8; 64];
        let len = request(&[]).emit(&mut buf).unwrap();
        assert_eq!(len, 42);

        assert_eq!(&buf[0..6], &PEER_MAC.0);
        assert_eq!(&buf[6..12], &OUR_MAC.0);
        assert_eq!(&buf[12..14], &[0x08, 0x00]);

        let ip = &buf[14..34];
        assert_eq!(ip[0], 0x45);
        assert_eq!(&ip[2..4], &[0x00, 28]);
        assert_eq!(&ip[4..6], &[0x12, 0x34]);
        assert_eq!(ip[8], 64);
        assert_eq!(ip[9], 1);
        assert_eq!(&ip[12..16], &[10, 0, 2, 15]);
        assert_eq!(&ip[16..20], &[10, 0, 2, 2]);
        assert_eq!(checksum(ip), 0);

        let icmp = &buf[34..42];
        assert_eq!(icmp[0], 8);
        assert_eq!(icmp[1], 0);
        assert_eq!(&icmp[4..6], &[0x43, 0x21]);
        assert_eq!(&icmp[6..8], &[0x00, 0x01]);
        assert_eq!(checksum(icmp), 0);
    }

    #[test]
    fn echo_checksums_agree_with_smoltcp() {
        let mut buf = [0u8; 128];
        let len = request(b"abcdefghijklmnopqrstuvwxyz").emit(&mut buf).unwrap();

        let eth = EthernetFrame::new_checked(&buf[..len]).unwrap();
        let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
        assert!(ip.verify_checksum());
        let icmp = Icmpv4Packet::new_checked(ip.payload()).unwrap();
        assert!(icmp.verify_checksum());
        assert_eq!(icmp.data(), b"abcdefghijklmnopqrstuvwxyz");
    }

    #[test]
    fn parse_roundtrips_echo_with_padding() {
        let mut buf = [0u8; 60];
        let len = request(b"hi").emit(&mut buf).unwrap();
        assert!(len < 60);

        match parse(&buf) {
            Inbound::Echo(echo) => assert_eq!(echo, request(b"hi")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn corrupted_checksums_are_rejected() {
        let mut buf = [0u8; 64];
        request(&[1, 2, 3]).emit(&mut buf).unwrap();

        let mut bad_ip = buf;
        bad_ip[14 + 8] ^= 0xFF;
        assert_eq!(parse(&bad_ip), Inbound::Other);

        let mut bad_icmp = buf;
        bad_icmp[14 + 20 + 8] ^= 0xFF;
        assert_eq!(parse(&bad_icmp), Inbound::Other);
    }

    #[test]
    fn arp_request_byte_layout() {
        let arp = ArpRepr::EthernetIpv4 {
            operation: ArpOperation::Request,
            source_hardware_addr: OUR_MAC,
            source_protocol_addr: OUR_IP,
            target_hardware_addr: EthernetAddress([0; 6]),
            target_protocol_addr: PEER_IP,
        };
        let mut buf = [0u8; ARP_FRAME_LEN];
        emit_arp(&mut buf, OUR_MAC, EthernetAddress::BROADCAST, &arp);

        assert_eq!(&buf[0..6], &[0xFF; 6]);
        assert_eq!(&buf[12..14], &[0x08, 0x06]);
        let body = &buf[14..42];
        assert_eq!(&body[0..2], &[0x00, 0x01]); // hardware: Ethernet
        assert_eq!(&body[2..4], &[0x08, 0x00]); // protocol: IPv4
        assert_eq!(body[4], 6);
        assert_eq!(body[5], 4);
        assert_eq!(&body[6..8], &[0x00, 0x01]); // request
        assert_eq!(&body[8..14], &OUR_MAC.0);
        assert_eq!(&body[14..18], &[10, 0, 2, 15]);
        assert_eq!(&body[18..24], &[0; 6]);
        assert_eq!(&body[24..28], &[10, 0, 2, 2]);

        assert_eq!(parse(&buf), Inbound::Arp(arp));
    }

    #[test]
    fn short_buffer_refuses_echo() {
        assert_eq!(request(&[0; 10]).emit(&mut [0u8; 51]), None);
        assert_eq!(request(&[0; 10]).emit(&mut [0u8; 52]), Some(52));
    }

    #[test]
    fn unrelated_frames_are_other() {
        assert_eq!(parse(&[0u8; 10]), Inbound::Other);

        // IPv6 ethertype.
        let mut buf = [0u8; 60];
        buf[12..14].copy_from_slice(&[0x86, 0xDD]);
        assert_eq!(parse(&buf), Inbound::Other);

        // UDP inside IPv4.
        let len = request(&[]).emit(&mut buf).unwrap();
        buf[14 + 9] = 17;
        buf[14 + 10..14 + 12].fill(0);
        let sum = checksum(&buf[14..34]);
        buf[14 + 10..14 + 12].copy_from_slice(&sum.to_be_bytes());
        assert_eq!(parse(&buf[..len]), Inbound::Other);
    }
}
