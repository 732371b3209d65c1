//! Dissector factory definition and built-in dissectors

use libwirecrab_tools::Config;

use crate::{DissectorBuilder, DissectorRegistry};

mod arp;
mod dns;
mod ethernet;
mod http;
mod icmp;
mod ipv4;
mod ipv6;
mod tcp;
mod udp;
mod vlan;

pub use arp::ArpDissector;
pub use dns::{dns_type_name, DnsDissector};
pub use ethernet::EthernetDissector;
pub use http::HttpDissector;
pub use icmp::{Icmpv4Dissector, Icmpv6Dissector};
pub use ipv4::Ipv4Dissector;
pub use ipv6::Ipv6Dissector;
pub use tcp::{tcp_flag_names, TcpDissector};
pub use udp::UdpDissector;
pub use vlan::VlanDissector;

/// Name of the protocol identified by an EtherType
pub fn ethertype_name(ethertype: u16) -> Option<&'static str> {
    match ethertype {
        0x0800 => Some("ip"),
        0x0806 => Some("arp"),
        0x8100 => Some("vlan"),
        0x86dd => Some("ipv6"),
        _ => None,
    }
}

/// Name of the protocol identified by an IP protocol number (or IPv6 next header)
pub fn ip_protocol_name(proto: u8) -> Option<&'static str> {
    match proto {
        1 => Some("icmp"),
        6 => Some("tcp"),
        17 => Some("udp"),
        58 => Some("icmpv6"),
        _ => None,
    }
}

/// Dissector Factory
///
/// A dissector factory stores all registered builders, and is used to
/// create a registry holding all dissector instances on request.
pub struct DissectorsFactory {
    list: Vec<Box<dyn DissectorBuilder>>,
}

impl DissectorsFactory {
    /// Create a new empty dissector factory
    pub fn new() -> DissectorsFactory {
        DissectorsFactory { list: Vec::new() }
    }

    /// Add a new dissector builder to the factory
    pub fn add_builder(&mut self, b: Box<dyn DissectorBuilder>) {
        self.list.push(b);
    }

    /// Instanciate all dissectors
    pub fn build_dissectors(&self, config: &Config) -> DissectorRegistry {
        self.build_filter_dissectors(|_| true, config)
    }

    /// Instanciate dissectors if they match predicate
    pub fn build_filter_dissectors<P>(&self, predicate: P, config: &Config) -> DissectorRegistry
    where
        P: Fn(&str) -> bool,
    {
        let mut registry = DissectorRegistry::new();

        self.list.iter().for_each(|b| {
            if predicate(b.name()) {
                if let Err(e) = b.build(&mut registry, config) {
                    warn!("could not build dissector {}: {}", b.name(), e);
                }
            }
        });

        registry
    }

    /// Iterate builder names
    pub fn iter_builders<Op>(&self, op: Op)
    where
        Op: FnMut(&str),
    {
        self.list.iter().map(|b| b.name()).for_each(op);
    }
}

impl Default for DissectorsFactory {
    /// Create a new dissector factory, with all built-in dissectors
    fn default() -> Self {
        let v: Vec<Box<dyn DissectorBuilder>> = vec![
            Box::new(ethernet::EthernetBuilder),
            Box::new(vlan::VlanBuilder),
            Box::new(arp::ArpBuilder),
            Box::new(ipv4::Ipv4Builder),
            Box::new(ipv6::Ipv6Builder),
            Box::new(icmp::Icmpv4Builder),
            Box::new(icmp::Icmpv6Builder),
            Box::new(tcp::TcpBuilder),
            Box::new(udp::UdpBuilder),
            Box::new(dns::DnsBuilder),
            Box::new(http::HttpBuilder),
        ];

        DissectorsFactory { list: v }
    }
}
