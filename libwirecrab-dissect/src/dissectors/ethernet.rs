use pnet_packet::ethernet::EthernetPacket;

use crate::default_dissector_builder;
use crate::dissector::{Dissection, Dissector, MatchContext};
use crate::dissectors::ethertype_name;
use crate::error::DissectError;
use crate::layer::Layer;

const ETHERNET_HEADER_LEN: usize = 14;

#[derive(Default)]
pub struct EthernetDissector;

default_dissector_builder!(EthernetDissector, EthernetBuilder, "eth", Layer::Datalink);

impl Dissector for EthernetDissector {
    fn name(&self) -> &'static str {
        "eth"
    }

    fn matches(&self, payload: &[u8], ctx: &MatchContext) -> bool {
        if payload.len() < ETHERNET_HEADER_LEN {
            return false;
        }
        if ctx.is_hinted("eth") {
            return true;
        }
        // without link type information, only accept frames carrying a known protocol
        ctx.is_empty()
            && ethertype_name(u16::from_be_bytes([payload[12], payload[13]])).is_some()
    }

    fn parse<'a>(&self, payload: &'a [u8]) -> Result<Dissection<'a>, DissectError> {
        let eth = EthernetPacket::new(payload).ok_or(DissectError::Truncated {
            protocol: "eth",
            needed: ETHERNET_HEADER_LEN,
            available: payload.len(),
        })?;
        let ethertype = eth.get_ethertype().0;
        let mut d = Dissection::new();
        d.field("eth.dst", eth.get_destination().to_string(), 0, 6);
        d.field("eth.src", eth.get_source().to_string(), 6, 6);
        d.field("eth.type", format!("0x{:04x}", ethertype), 12, 2);
        d.payload = Some(&payload[ETHERNET_HEADER_LEN..]);
        d.next = ethertype_name(ethertype);
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: &[u8] = &[
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // dst
        0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, // src
        0x08, 0x06, // arp
        0xde, 0xad,
    ];

    #[test]
    fn ethernet_parse() {
        let d = EthernetDissector.parse(FRAME).expect("parse");
        assert_eq!(d.fields["eth.dst"].value, "00:11:22:33:44:55");
        assert_eq!(d.fields["eth.src"].value, "66:77:88:99:aa:bb");
        assert_eq!(d.fields["eth.type"].value, "0x0806");
        assert_eq!(d.next, Some("arp"));
        assert_eq!(d.payload, Some(&FRAME[14..]));
    }

    #[test]
    fn ethernet_matches() {
        let ctx = MatchContext::default();
        assert!(EthernetDissector.matches(FRAME, &ctx));
        assert!(!EthernetDissector.matches(&FRAME[..10], &ctx));
        let mut unknown = FRAME.to_vec();
        unknown[12] = 0x12;
        assert!(!EthernetDissector.matches(&unknown, &ctx));
        assert!(EthernetDissector.matches(&unknown, &MatchContext::with_hint("eth")));
        assert!(!EthernetDissector.matches(FRAME, &MatchContext::with_hint("ip")));
    }
}
