use pnet_packet::ipv4::{checksum, Ipv4Flags, Ipv4Packet};

use crate::default_dissector_builder;
use crate::dissector::{Dissection, Dissector, MatchContext};
use crate::dissectors::ip_protocol_name;
use crate::error::DissectError;
use crate::layer::Layer;

const IPV4_MIN_HEADER_LEN: usize = 20;

#[derive(Default)]
pub struct Ipv4Dissector;

default_dissector_builder!(Ipv4Dissector, Ipv4Builder, "ip", Layer::Network);

impl Ipv4Dissector {
    fn header_len(payload: &[u8]) -> usize {
        usize::from(payload[0] & 0x0f) * 4
    }
}

impl Dissector for Ipv4Dissector {
    fn name(&self) -> &'static str {
        "ip"
    }

    fn matches(&self, payload: &[u8], ctx: &MatchContext) -> bool {
        if payload.len() < IPV4_MIN_HEADER_LEN || payload[0] >> 4 != 4 {
            return false;
        }
        if ctx.is_hinted("ip") {
            return true;
        }
        if !ctx.is_empty() {
            return false;
        }
        // no hint: require a valid header checksum
        let hdr_len = Self::header_len(payload);
        if hdr_len < IPV4_MIN_HEADER_LEN || hdr_len > payload.len() {
            return false;
        }
        match Ipv4Packet::new(&payload[..hdr_len]) {
            Some(ip) => ip.get_checksum() == checksum(&ip),
            None => false,
        }
    }

    fn parse<'a>(&self, payload: &'a [u8]) -> Result<Dissection<'a>, DissectError> {
        DissectError::check_len("ip", payload, IPV4_MIN_HEADER_LEN)?;
        let hdr_len = Self::header_len(payload);
        if hdr_len < IPV4_MIN_HEADER_LEN {
            return Err(DissectError::Malformed {
                protocol: "ip",
                reason: "header length below minimum",
            });
        }
        DissectError::check_len("ip", payload, hdr_len)?;
        let ip = Ipv4Packet::new(payload).ok_or(DissectError::Truncated {
            protocol: "ip",
            needed: IPV4_MIN_HEADER_LEN,
            available: payload.len(),
        })?;
        let total_len = usize::from(ip.get_total_length());
        let proto = ip.get_next_level_protocol().0;
        let flags = ip.get_flags();
        let frag_offset = ip.get_fragment_offset();

        let mut d = Dissection::new();
        d.field("ip.version", ip.get_version().to_string(), 0, 1);
        d.field("ip.hdr_len", hdr_len.to_string(), 0, 1);
        d.field("ip.dsfield", format!("0x{:02x}", payload[1]), 1, 1);
        d.field("ip.len", total_len.to_string(), 2, 2);
        d.field("ip.id", format!("0x{:04x}", ip.get_identification()), 4, 2);
        d.field("ip.flags", format!("0x{:x}", flags), 6, 1);
        d.field("ip.frag_offset", frag_offset.to_string(), 6, 2);
        d.field("ip.ttl", ip.get_ttl().to_string(), 8, 1);
        d.field("ip.proto", proto.to_string(), 9, 1);
        d.field("ip.checksum", format!("0x{:04x}", ip.get_checksum()), 10, 2);
        d.field("ip.src", ip.get_source().to_string(), 12, 4);
        d.field("ip.dst", ip.get_destination().to_string(), 16, 4);

        // ignore padding after the datagram (for ex. Ethernet minimum frame size)
        let end = if total_len >= hdr_len {
            total_len.min(payload.len())
        } else {
            payload.len()
        };
        d.payload = Some(&payload[hdr_len..end]);
        // only the first fragment starts with the transport header
        let more_fragments = flags & Ipv4Flags::MoreFragments != 0;
        if frag_offset == 0 && !more_fragments {
            d.next = ip_protocol_name(proto);
        } else if frag_offset != 0 {
            d.payload = None;
        }
        Ok(d)
    }
}
