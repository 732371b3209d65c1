use pnet_packet::arp::ArpPacket;

use crate::default_dissector_builder;
use crate::dissector::{Dissection, Dissector, MatchContext};
use crate::error::DissectError;
use crate::layer::Layer;

/// Size of an ARP packet for Ethernet/IPv4
const ARP_ETH_IPV4_LEN: usize = 28;

#[derive(Default)]
pub struct ArpDissector;

default_dissector_builder!(ArpDissector, ArpBuilder, "arp", Layer::Network);

impl Dissector for ArpDissector {
    fn name(&self) -> &'static str {
        "arp"
    }

    fn matches(&self, payload: &[u8], ctx: &MatchContext) -> bool {
        ctx.is_hinted("arp") && payload.len() >= ARP_ETH_IPV4_LEN
    }

    fn parse<'a>(&self, payload: &'a [u8]) -> Result<Dissection<'a>, DissectError> {
        DissectError::check_len("arp", payload, ARP_ETH_IPV4_LEN)?;
        let arp = ArpPacket::new(payload).ok_or(DissectError::Truncated {
            protocol: "arp",
            needed: ARP_ETH_IPV4_LEN,
            available: payload.len(),
        })?;
        if arp.get_hw_addr_len() != 6 || arp.get_proto_addr_len() != 4 {
            return Err(DissectError::Malformed {
                protocol: "arp",
                reason: "only Ethernet/IPv4 addresses are supported",
            });
        }
        let mut d = Dissection::new();
        d.field("arp.hw.type", arp.get_hardware_type().0.to_string(), 0, 2);
        d.field("arp.proto.type", format!("0x{:04x}", arp.get_protocol_type().0), 2, 2);
        d.field("arp.hw.size", arp.get_hw_addr_len().to_string(), 4, 1);
        d.field("arp.proto.size", arp.get_proto_addr_len().to_string(), 5, 1);
        d.field("arp.opcode", arp.get_operation().0.to_string(), 6, 2);
        d.field("arp.src.hw_mac", arp.get_sender_hw_addr().to_string(), 8, 6);
        d.field("arp.src.proto_ipv4", arp.get_sender_proto_addr().to_string(), 14, 4);
        d.field("arp.dst.hw_mac", arp.get_target_hw_addr().to_string(), 18, 6);
        d.field("arp.dst.proto_ipv4", arp.get_target_proto_addr().to_string(), 24, 4);
        Ok(d)
    }
}
