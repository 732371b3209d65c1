use pnet_packet::vlan::VlanPacket;

use crate::default_dissector_builder;
use crate::dissector::{Dissection, Dissector, MatchContext};
use crate::dissectors::ethertype_name;
use crate::error::DissectError;
use crate::layer::Layer;

const VLAN_HEADER_LEN: usize = 4;

/// IEEE 802.1Q tag
#[derive(Default)]
pub struct VlanDissector;

default_dissector_builder!(VlanDissector, VlanBuilder, "vlan", Layer::Datalink);

impl Dissector for VlanDissector {
    fn name(&self) -> &'static str {
        "vlan"
    }

    fn matches(&self, payload: &[u8], ctx: &MatchContext) -> bool {
        ctx.is_hinted("vlan") && payload.len() >= VLAN_HEADER_LEN
    }

    fn parse<'a>(&self, payload: &'a [u8]) -> Result<Dissection<'a>, DissectError> {
        let vlan = VlanPacket::new(payload).ok_or(DissectError::Truncated {
            protocol: "vlan",
            needed: VLAN_HEADER_LEN,
            available: payload.len(),
        })?;
        let ethertype = vlan.get_ethertype().0;
        let mut d = Dissection::new();
        d.field("vlan.priority", vlan.get_priority_code_point().0.to_string(), 0, 1);
        d.field("vlan.dei", vlan.get_drop_eligible_indicator().to_string(), 0, 1);
        d.field("vlan.id", vlan.get_vlan_identifier().to_string(), 0, 2);
        d.field("vlan.etype", format!("0x{:04x}", ethertype), 2, 2);
        d.payload = Some(&payload[VLAN_HEADER_LEN..]);
        d.next = ethertype_name(ethertype);
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vlan_parse() {
        // priority 3, vlan 123, ipv4
        let data = [0x60, 0x7b, 0x08, 0x00, 0x45];
        assert!(!VlanDissector.matches(&data, &MatchContext::default()));
        assert!(VlanDissector.matches(&data, &MatchContext::with_hint("vlan")));
        let d = VlanDissector.parse(&data).expect("parse");
        assert_eq!(d.fields["vlan.id"].value, "123");
        assert_eq!(d.fields["vlan.priority"].value, "3");
        assert_eq!(d.next, Some("ip"));
        assert_eq!(d.payload, Some(&data[4..]));
    }
}
