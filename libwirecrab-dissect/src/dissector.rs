use libwirecrab_tools::Config;

use crate::dissectors::{ethertype_name, ip_protocol_name};
use crate::error::DissectError;
use crate::registry::DissectorRegistry;
use crate::tree::{FieldValue, Fields, ProtocolNode};

/// Information known about a payload before it is dissected
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MatchContext {
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    /// Protocol announced by the enclosing layer (EtherType, IP protocol number, ...)
    pub hint: Option<&'static str>,
}

impl MatchContext {
    pub fn with_hint(hint: &'static str) -> Self {
        MatchContext {
            hint: Some(hint),
            ..MatchContext::default()
        }
    }

    /// Return true if nothing is known about the payload
    pub fn is_empty(&self) -> bool {
        self.hint.is_none() && self.src_port.is_none() && self.dst_port.is_none()
    }

    pub fn is_hinted(&self, name: &str) -> bool {
        self.hint == Some(name)
    }

    /// Return true if either port is one of `ports`
    pub fn has_port(&self, ports: &[u16]) -> bool {
        [self.src_port, self.dst_port]
            .iter()
            .flatten()
            .any(|p| ports.contains(p))
    }

    /// Rebuild the context for the layer following `parent`, from the fields of an
    /// already decoded tree
    pub fn from_parent(parent: &ProtocolNode, outer: &MatchContext) -> MatchContext {
        let port = |key: &str| -> Option<u16> { parent.get(key)?.trim().parse().ok() };
        let (src_port, dst_port) = match parent.name.as_str() {
            "tcp" | "udp" => (
                port(&format!("{}.srcport", parent.name)),
                port(&format!("{}.dstport", parent.name)),
            ),
            _ => (outer.src_port, outer.dst_port),
        };
        let ethertype = |key: &str| parse_number(parent.get(key)).and_then(|t| ethertype_name(t as u16));
        let ip_proto = |key: &str| parse_number(parent.get(key)).and_then(|p| ip_protocol_name(p as u8));
        let hint = match parent.name.as_str() {
            "eth" => ethertype("eth.type"),
            "vlan" => ethertype("vlan.etype"),
            "ip" => ip_proto("ip.proto"),
            "ipv6" => ip_proto("ipv6.nxt"),
            _ => None,
        };
        MatchContext {
            src_port,
            dst_port,
            hint,
        }
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal field value
fn parse_number(s: Option<&str>) -> Option<u32> {
    let s = s?.trim();
    match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// Result of a successful parse
///
/// Field offsets are relative to the start of the parsed payload.
#[derive(Debug, Default)]
pub struct Dissection<'a> {
    pub fields: Fields,
    /// Encapsulated data, to be dissected as the next layer
    pub payload: Option<&'a [u8]>,
    /// Next layer, if already decoded by the dissector. Takes precedence over `payload`.
    pub child: Option<ProtocolNode>,
    /// Protocol expected in `payload`
    pub next: Option<&'static str>,
    /// Ports announced to the next layer
    pub ports: Option<(u16, u16)>,
}

impl<'a> Dissection<'a> {
    pub fn new() -> Self {
        Dissection::default()
    }

    /// Add a field located at `offset..offset+length` in the parsed data
    pub fn field<K: Into<String>, V: Into<String>>(
        &mut self,
        key: K,
        value: V,
        offset: usize,
        length: usize,
    ) {
        self.fields
            .entry(key.into())
            .or_insert_with(|| FieldValue::positioned(value, offset, length));
    }

    /// Add a computed field, with no position in the data
    pub fn computed<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.fields
            .entry(key.into())
            .or_insert_with(|| FieldValue::new(value));
    }
}

/// A protocol decoder
pub trait Dissector: Sync + Send {
    /// Canonical, lower-case protocol name (`eth`, `ip`, `tcp`, ...)
    fn name(&self) -> &'static str;

    /// Quick test: can `payload` be parsed by this dissector?
    fn matches(&self, payload: &[u8], ctx: &MatchContext) -> bool;

    fn parse<'a>(&self, payload: &'a [u8]) -> Result<Dissection<'a>, DissectError>;
}

pub trait DissectorBuilder: Sync + Send {
    fn name(&self) -> &'static str;
    fn build(&self, registry: &mut DissectorRegistry, config: &Config) -> Result<(), DissectError>;
}

/// Derives a dissector builder relying on the Dissector::default() function, and registering
/// the dissector for one layer
#[macro_export]
macro_rules! default_dissector_builder {
    ($name:ident, $builder:ident, $proto:expr, $layer:expr) => {
        pub struct $builder;

        impl $crate::DissectorBuilder for $builder {
            fn name(&self) -> &'static str {
                $proto
            }
            fn build(
                &self,
                registry: &mut $crate::DissectorRegistry,
                _config: &$crate::Config,
            ) -> Result<(), $crate::DissectError> {
                let dissector = ::std::sync::Arc::new($name::default());
                let id = registry.add_dissector(dissector);
                registry.register_layer($layer, id)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_from_parent_fields() {
        let mut ip = ProtocolNode::new("ip");
        ip.add_field("ip.proto", "17");
        let ctx = MatchContext::from_parent(&ip, &MatchContext::default());
        assert_eq!(ctx.hint, Some("udp"));

        let mut udp = ProtocolNode::new("udp");
        udp.add_field("udp.srcport", "53");
        udp.add_field("udp.dstport", "40000");
        let ctx = MatchContext::from_parent(&udp, &ctx);
        assert_eq!(ctx.src_port, Some(53));
        assert_eq!(ctx.dst_port, Some(40000));
        assert_eq!(ctx.hint, None);
        assert!(ctx.has_port(&[53]));

        let mut eth = ProtocolNode::new("eth");
        eth.add_field("eth.type", "0x0800");
        let ctx = MatchContext::from_parent(&eth, &MatchContext::default());
        assert!(ctx.is_hinted("ip"));
    }
}
