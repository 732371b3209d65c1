use pnet_packet::icmp::IcmpPacket;
use pnet_packet::icmpv6::Icmpv6Packet;

use crate::default_dissector_builder;
use crate::dissector::{Dissection, Dissector, MatchContext};
use crate::error::DissectError;
use crate::layer::Layer;

const ICMP_HEADER_LEN: usize = 4;

const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_ECHO_REQUEST: u8 = 8;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

/// Identifier and sequence number of echo messages
fn add_echo_fields(d: &mut Dissection, proto: &str, payload: &[u8]) {
    if payload.len() >= 8 {
        let ident = u16::from_be_bytes([payload[4], payload[5]]);
        let seq = u16::from_be_bytes([payload[6], payload[7]]);
        d.field(format!("{}.ident", proto), ident.to_string(), 4, 2);
        d.field(format!("{}.seq", proto), seq.to_string(), 6, 2);
    }
}

#[derive(Default)]
pub struct Icmpv4Dissector;

default_dissector_builder!(Icmpv4Dissector, Icmpv4Builder, "icmp", Layer::Transport);

impl Dissector for Icmpv4Dissector {
    fn name(&self) -> &'static str {
        "icmp"
    }

    fn matches(&self, payload: &[u8], ctx: &MatchContext) -> bool {
        ctx.is_hinted("icmp") && payload.len() >= ICMP_HEADER_LEN
    }

    fn parse<'a>(&self, payload: &'a [u8]) -> Result<Dissection<'a>, DissectError> {
        let icmp = IcmpPacket::new(payload).ok_or(DissectError::Truncated {
            protocol: "icmp",
            needed: ICMP_HEADER_LEN,
            available: payload.len(),
        })?;
        let icmp_type = icmp.get_icmp_type().0;
        let mut d = Dissection::new();
        d.field("icmp.type", icmp_type.to_string(), 0, 1);
        d.field("icmp.code", icmp.get_icmp_code().0.to_string(), 1, 1);
        d.field("icmp.checksum", format!("0x{:04x}", icmp.get_checksum()), 2, 2);
        if icmp_type == ICMP_ECHO_REQUEST || icmp_type == ICMP_ECHO_REPLY {
            add_echo_fields(&mut d, "icmp", payload);
        }
        Ok(d)
    }
}

#[derive(Default)]
pub struct Icmpv6Dissector;

default_dissector_builder!(Icmpv6Dissector, Icmpv6Builder, "icmpv6", Layer::Transport);

impl Dissector for Icmpv6Dissector {
    fn name(&self) -> &'static str {
        "icmpv6"
    }

    fn matches(&self, payload: &[u8], ctx: &MatchContext) -> bool {
        ctx.is_hinted("icmpv6") && payload.len() >= ICMP_HEADER_LEN
    }

    fn parse<'a>(&self, payload: &'a [u8]) -> Result<Dissection<'a>, DissectError> {
        let icmp = Icmpv6Packet::new(payload).ok_or(DissectError::Truncated {
            protocol: "icmpv6",
            needed: ICMP_HEADER_LEN,
            available: payload.len(),
        })?;
        let icmp_type = icmp.get_icmpv6_type().0;
        let mut d = Dissection::new();
        d.field("icmpv6.type", icmp_type.to_string(), 0, 1);
        d.field("icmpv6.code", icmp.get_icmpv6_code().0.to_string(), 1, 1);
        d.field("icmpv6.checksum", format!("0x{:04x}", icmp.get_checksum()), 2, 2);
        if icmp_type == ICMPV6_ECHO_REQUEST || icmp_type == ICMPV6_ECHO_REPLY {
            add_echo_fields(&mut d, "icmpv6", payload);
        }
        Ok(d)
    }
}
