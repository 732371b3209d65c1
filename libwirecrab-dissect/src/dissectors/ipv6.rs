use pnet_packet::ipv6::Ipv6Packet;

use crate::default_dissector_builder;
use crate::dissector::{Dissection, Dissector, MatchContext};
use crate::dissectors::ip_protocol_name;
use crate::error::DissectError;
use crate::layer::Layer;

const IPV6_HEADER_LEN: usize = 40;

/// IPv6 fixed header. Extension headers are not followed: the payload of a packet with
/// extension headers is left undecoded.
#[derive(Default)]
pub struct Ipv6Dissector;

default_dissector_builder!(Ipv6Dissector, Ipv6Builder, "ipv6", Layer::Network);

impl Dissector for Ipv6Dissector {
    fn name(&self) -> &'static str {
        "ipv6"
    }

    fn matches(&self, payload: &[u8], ctx: &MatchContext) -> bool {
        if payload.len() < IPV6_HEADER_LEN || payload[0] >> 4 != 6 {
            return false;
        }
        if ctx.is_hinted("ipv6") {
            return true;
        }
        // no hint: payload length must be consistent with the data
        ctx.is_empty()
            && usize::from(u16::from_be_bytes([payload[4], payload[5]])) + IPV6_HEADER_LEN
                == payload.len()
    }

    fn parse<'a>(&self, payload: &'a [u8]) -> Result<Dissection<'a>, DissectError> {
        let ip = Ipv6Packet::new(payload).ok_or(DissectError::Truncated {
            protocol: "ipv6",
            needed: IPV6_HEADER_LEN,
            available: payload.len(),
        })?;
        let plen = usize::from(ip.get_payload_length());
        let next_header = ip.get_next_header().0;

        let mut d = Dissection::new();
        d.field("ipv6.version", ip.get_version().to_string(), 0, 1);
        d.field("ipv6.tclass", format!("0x{:02x}", ip.get_traffic_class()), 0, 2);
        d.field("ipv6.flow", format!("0x{:05x}", ip.get_flow_label()), 1, 3);
        d.field("ipv6.plen", plen.to_string(), 4, 2);
        d.field("ipv6.nxt", next_header.to_string(), 6, 1);
        d.field("ipv6.hlim", ip.get_hop_limit().to_string(), 7, 1);
        d.field("ipv6.src", ip.get_source().to_string(), 8, 16);
        d.field("ipv6.dst", ip.get_destination().to_string(), 24, 16);

        let end = (IPV6_HEADER_LEN + plen).min(payload.len());
        d.payload = Some(&payload[IPV6_HEADER_LEN..end]);
        d.next = ip_protocol_name(next_header);
        Ok(d)
    }
}
