use super::entropy::entropy;
use crate::flow::FlowMetadata;

use chrono::{DateTime, Utc};
use etherparse::{LaxNetSlice, LaxSlicedPacket, TransportSlice};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Link layer framing of the captured bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    RawIp,
}

impl LinkLayer {
    /// Maps a pcap DLT value to a supported link layer.
    pub fn from_dlt(dlt: i32) -> Option<Self> {
        match dlt {
            1 => Some(Self::Ethernet),
            // DLT_RAW has two values depending on the platform, 101 is LINKTYPE_RAW
            12 | 14 | 101 | 228 | 229 => Some(Self::RawIp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkLayer {
    Ipv4 {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: u8,
    },
    Ipv6 {
        src: Ipv6Addr,
        dst: Ipv6Addr,
        next_header: u8,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
    pub urg: bool,
}

impl TcpFlags {
    /// One character per set flag, always in `S A F R P U` order.
    pub fn to_flag_string(self) -> String {
        [
            (self.syn, 'S'),
            (self.ack, 'A'),
            (self.fin, 'F'),
            (self.rst, 'R'),
            (self.psh, 'P'),
            (self.urg, 'U'),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, c)| *c)
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportLayer<'a> {
    Tcp {
        src_port: u16,
        dst_port: u16,
        flags: TcpFlags,
        payload: &'a [u8],
    },
    Udp {
        src_port: u16,
        dst_port: u16,
        payload: &'a [u8],
    },
    Other,
}

/// Layers of a single captured frame relevant for flow metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub network: NetworkLayer,
    pub transport: TransportLayer<'a>,
}

impl<'a> Frame<'a> {
    /// Returns `None` for frames without an IP layer or ones that cannot be sliced.
    ///
    /// Frames cut short by the snapshot length still decode, payload values then
    /// only cover the captured bytes.
    pub fn parse(link: LinkLayer, data: &'a [u8]) -> Option<Frame<'a>> {
        let sliced = match link {
            LinkLayer::Ethernet => LaxSlicedPacket::from_ethernet(data).ok()?,
            LinkLayer::RawIp => LaxSlicedPacket::from_ip(data).ok()?,
        };

        let network = match &sliced.net {
            Some(LaxNetSlice::Ipv4(ipv4)) => {
                let header = ipv4.header();
                NetworkLayer::Ipv4 {
                    src: header.source_addr(),
                    dst: header.destination_addr(),
                    protocol: header.protocol().0,
                }
            }
            Some(LaxNetSlice::Ipv6(ipv6)) => {
                let header = ipv6.header();
                NetworkLayer::Ipv6 {
                    src: header.source_addr(),
                    dst: header.destination_addr(),
                    next_header: header.next_header().0,
                }
            }
            #[allow(unreachable_patterns)]
            _ => return None,
        };

        let transport = match sliced.transport {
            Some(TransportSlice::Tcp(tcp)) => TransportLayer::Tcp {
                src_port: tcp.source_port(),
                dst_port: tcp.destination_port(),
                flags: TcpFlags {
                    syn: tcp.syn(),
                    ack: tcp.ack(),
                    fin: tcp.fin(),
                    rst: tcp.rst(),
                    psh: tcp.psh(),
                    urg: tcp.urg(),
                },
                payload: tcp.payload(),
            },
            Some(TransportSlice::Udp(udp)) => TransportLayer::Udp {
                src_port: udp.source_port(),
                dst_port: udp.destination_port(),
                payload: udp.payload(),
            },
            _ => TransportLayer::Other,
        };

        Some(Frame { network, transport })
    }

    pub fn into_metadata(self, timestamp: DateTime<Utc>) -> FlowMetadata {
        let (src_ip, dst_ip, mut protocol) = match self.network {
            NetworkLayer::Ipv4 { src, dst, protocol } => {
                (src.to_string(), dst.to_string(), protocol_label(protocol))
            }
            NetworkLayer::Ipv6 {
                src,
                dst,
                next_header,
            } => (src.to_string(), dst.to_string(), protocol_label(next_header)),
        };

        let (src_port, dst_port, tcp_flags, payload) = match self.transport {
            TransportLayer::Tcp {
                src_port,
                dst_port,
                flags,
                payload,
            } => {
                protocol = String::from("TCP");
                let flags = flags.to_flag_string();
                (src_port, dst_port, Some(flags).filter(|f| !f.is_empty()), payload)
            }
            TransportLayer::Udp {
                src_port,
                dst_port,
                payload,
            } => {
                protocol = String::from("UDP");
                (src_port, dst_port, None, payload)
            }
            TransportLayer::Other => (0, 0, None, &[][..]),
        };

        FlowMetadata {
            timestamp,
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
            payload_len: payload.len(),
            tcp_flags,
            entropy: entropy(payload),
        }
    }
}

/// Decodes a captured frame into flow metadata, `None` for non-IP frames.
pub fn decode(link: LinkLayer, timestamp: DateTime<Utc>, data: &[u8]) -> Option<FlowMetadata> {
    Frame::parse(link, data).map(|frame| frame.into_metadata(timestamp))
}

fn protocol_label(number: u8) -> String {
    let label = match number {
        0 => "IPv6HopByHop",
        1 => "ICMPv4",
        2 => "IGMP",
        4 => "IPv4",
        6 => "TCP",
        17 => "UDP",
        41 => "IPv6",
        43 => "IPv6Routing",
        44 => "IPv6Fragment",
        47 => "GRE",
        50 => "IPSecESP",
        51 => "IPSecAH",
        58 => "ICMPv6",
        59 => "IPv6NoNextHeader",
        60 => "IPv6Destination",
        132 => "SCTP",
        other => return other.to_string(),
    };
    label.to_owned()
}
