use pnet_packet::udp::UdpPacket;

use crate::default_dissector_builder;
use crate::dissector::{Dissection, Dissector, MatchContext};
use crate::error::DissectError;
use crate::layer::Layer;

const UDP_HEADER_LEN: usize = 8;

#[derive(Default)]
pub struct UdpDissector;

default_dissector_builder!(UdpDissector, UdpBuilder, "udp", Layer::Transport);

impl Dissector for UdpDissector {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn matches(&self, payload: &[u8], ctx: &MatchContext) -> bool {
        ctx.is_hinted("udp") && payload.len() >= UDP_HEADER_LEN
    }

    fn parse<'a>(&self, payload: &'a [u8]) -> Result<Dissection<'a>, DissectError> {
        let udp = UdpPacket::new(payload).ok_or(DissectError::Truncated {
            protocol: "udp",
            needed: UDP_HEADER_LEN,
            available: payload.len(),
        })?;
        let src_port = udp.get_source();
        let dst_port = udp.get_destination();
        let length = usize::from(udp.get_length());

        let mut d = Dissection::new();
        d.field("udp.srcport", src_port.to_string(), 0, 2);
        d.field("udp.dstport", dst_port.to_string(), 2, 2);
        d.field("udp.length", length.to_string(), 4, 2);
        d.field("udp.checksum", format!("0x{:04x}", udp.get_checksum()), 6, 2);

        d.ports = Some((src_port, dst_port));
        let end = if length >= UDP_HEADER_LEN {
            length.min(payload.len())
        } else {
            payload.len()
        };
        if end > UDP_HEADER_LEN {
            d.payload = Some(&payload[UDP_HEADER_LEN..end]);
        }
        Ok(d)
    }
}
