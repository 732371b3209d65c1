use libwirecrab_tools::Duration;
use serde::{Deserialize, Serialize};

use crate::dissectors::{dns_type_name, tcp_flag_names};
use crate::tree::ProtocolNode;

/// Denormalized summary of a decoded packet
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketMeta {
    /// Frame number inside the capture session (1-based)
    pub number: u64,
    /// Capture time, RFC 3339
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub src_ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dst_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<u16>,
    /// Innermost layer name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    pub length: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub info: String,
}

/// A decoded packet, as kept by the packet store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketRecord {
    pub meta: PacketMeta,
    pub tree: ProtocolNode,
}

impl PacketRecord {
    /// Build a record, extracting the summary from the tree
    pub fn new(tree: ProtocolNode) -> Self {
        let meta = extract_meta(&tree);
        PacketRecord { meta, tree }
    }
}

fn set_if_empty(target: &mut String, value: Option<&str>) {
    if target.is_empty() {
        if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
            *target = v.to_string();
        }
    }
}

fn parse_u16(value: Option<&str>) -> Option<u16> {
    value?.trim().parse().ok()
}

fn parse_u32(value: Option<&str>) -> Option<u32> {
    value?.trim().parse().ok()
}

/// Extract the packet summary from a protocol tree
///
/// Values set by outer layers are kept (for ex. with IP-in-IP, the outer addresses are
/// used). Values that cannot be parsed are left empty.
pub fn extract_meta(tree: &ProtocolNode) -> PacketMeta {
    let mut meta = PacketMeta::default();
    let mut timestamp = None;
    let mut length = None;
    let mut eth_src = None;
    let mut eth_dst = None;

    for node in tree.iter() {
        meta.protocol.clone_from(&node.name);
        match node.name.as_str() {
            "frame" => {
                if length.is_none() {
                    length = parse_u32(node.get("frame.len"));
                }
                if meta.number == 0 {
                    meta.number = node
                        .get("frame.number")
                        .and_then(|n| n.trim().parse().ok())
                        .unwrap_or(0);
                }
                if timestamp.is_none() {
                    timestamp = node.get("frame.time_epoch").and_then(Duration::parse_epoch);
                }
                set_if_empty(&mut meta.info, node.get("_ws.col.info"));
            }
            "eth" => {
                eth_src = eth_src.or(node.get("eth.src"));
                eth_dst = eth_dst.or(node.get("eth.dst"));
            }
            "ip" => {
                set_if_empty(&mut meta.src_ip, node.get("ip.src"));
                set_if_empty(&mut meta.dst_ip, node.get("ip.dst"));
                if length.is_none() {
                    length = parse_u32(node.get("ip.len"));
                }
            }
            "ipv6" => {
                set_if_empty(&mut meta.src_ip, node.get("ipv6.src"));
                set_if_empty(&mut meta.dst_ip, node.get("ipv6.dst"));
            }
            "arp" => {
                set_if_empty(&mut meta.src_ip, node.get("arp.src.proto_ipv4"));
                set_if_empty(&mut meta.dst_ip, node.get("arp.dst.proto_ipv4"));
            }
            "tcp" | "udp" => {
                if meta.src_port.is_none() {
                    meta.src_port = parse_u16(node.get(&format!("{}.srcport", node.name)));
                }
                if meta.dst_port.is_none() {
                    meta.dst_port = parse_u16(node.get(&format!("{}.dstport", node.name)));
                }
            }
            _ => (),
        }
    }

    set_if_empty(&mut meta.src_ip, eth_src);
    set_if_empty(&mut meta.dst_ip, eth_dst);
    meta.length = length.unwrap_or(0);
    meta.timestamp = timestamp.unwrap_or_else(Duration::now).to_rfc3339();
    if meta.info.is_empty() {
        meta.info = summarize(tree).unwrap_or_default();
    }
    meta
}

/// One-line summary of the innermost layer having one
pub fn summarize(tree: &ProtocolNode) -> Option<String> {
    let nodes: Vec<&ProtocolNode> = tree.iter().collect();
    nodes.iter().rev().find_map(|node| summarize_node(node))
}

fn summarize_node(node: &ProtocolNode) -> Option<String> {
    match node.name.as_str() {
        "http" => summarize_http(node),
        "dns" => summarize_dns(node),
        "tcp" => summarize_tcp(node),
        "udp" => {
            let src = node.get("udp.srcport")?;
            let dst = node.get("udp.dstport")?;
            let len = node.get("udp.length").unwrap_or("0");
            Some(format!("{} → {} Len={}", src, dst, len))
        }
        "icmp" | "icmpv6" => summarize_icmp(node),
        "arp" => summarize_arp(node),
        "ip" | "ipv6" => {
            let p = &node.name;
            let src = node.get(&format!("{}.src", p))?;
            let dst = node.get(&format!("{}.dst", p))?;
            Some(format!("{} → {}", src, dst))
        }
        _ => None,
    }
}

fn summarize_http(node: &ProtocolNode) -> Option<String> {
    if let Some(method) = node.get("http.request.method") {
        let uri = node.get("http.request.uri").unwrap_or("");
        let version = node.get("http.request.version").unwrap_or("");
        return Some(format!("{} {} {}", method, uri, version).trim_end().to_string());
    }
    let version = node.get("http.response.version")?;
    let code = node.get("http.response.code").unwrap_or("");
    let phrase = node.get("http.response.phrase").unwrap_or("");
    Some(format!("{} {} {}", version, code, phrase).trim_end().to_string())
}

fn summarize_dns(node: &ProtocolNode) -> Option<String> {
    let id = node.get("dns.id")?;
    let kind = match node.get("dns.flags.response") {
        Some("1") => "Standard query response",
        _ => "Standard query",
    };
    let mut s = format!("{} {}", kind, id);
    if let Some(qtype) = node.get("dns.qry.type") {
        let qtype = qtype
            .trim()
            .parse::<u16>()
            .ok()
            .and_then(dns_type_name)
            .unwrap_or(qtype);
        s.push(' ');
        s.push_str(qtype);
    }
    if let Some(name) = node.get("dns.qry.name") {
        s.push(' ');
        s.push_str(name);
    }
    if let Some(a) = node.get("dns.a") {
        s.push_str(" A ");
        s.push_str(a);
    } else if let Some(aaaa) = node.get("dns.aaaa") {
        s.push_str(" AAAA ");
        s.push_str(aaaa);
    }
    Some(s)
}

fn summarize_tcp(node: &ProtocolNode) -> Option<String> {
    let src = node.get("tcp.srcport")?;
    let dst = node.get("tcp.dstport")?;
    let mut s = format!("{} → {}", src, dst);
    if let Some(flags) = node.get("tcp.flags") {
        let flags = flags.trim();
        let value = match flags.strip_prefix("0x") {
            Some(hex) => u16::from_str_radix(hex, 16).ok(),
            None => flags.parse().ok(),
        };
        if let Some(value) = value {
            let names = tcp_flag_names(value);
            if !names.is_empty() {
                s.push_str(&format!(" [{}]", names.join(", ")));
            }
        }
    }
    for (key, label) in [
        ("tcp.seq", "Seq"),
        ("tcp.ack", "Ack"),
        ("tcp.window_size_value", "Win"),
        ("tcp.len", "Len"),
    ] {
        if let Some(v) = node.get(key) {
            s.push_str(&format!(" {}={}", label, v));
        }
    }
    Some(s)
}

fn summarize_icmp(node: &ProtocolNode) -> Option<String> {
    let p = node.name.as_str();
    let icmp_type: u8 = node.get(&format!("{}.type", p))?.trim().parse().ok()?;
    let desc = match (p, icmp_type) {
        ("icmp", 0) | ("icmpv6", 129) => "Echo (ping) reply",
        ("icmp", 8) | ("icmpv6", 128) => "Echo (ping) request",
        ("icmp", 3) => "Destination unreachable",
        ("icmp", 11) => "Time-to-live exceeded",
        ("icmpv6", 1) => "Destination Unreachable",
        ("icmpv6", 133) => "Router Solicitation",
        ("icmpv6", 134) => "Router Advertisement",
        ("icmpv6", 135) => "Neighbor Solicitation",
        ("icmpv6", 136) => "Neighbor Advertisement",
        _ => return Some(format!("Type {}", icmp_type)),
    };
    let mut s = desc.to_string();
    if let (Some(id), Some(seq)) = (
        node.get(&format!("{}.ident", p)),
        node.get(&format!("{}.seq", p)),
    ) {
        s.push_str(&format!(" id={}, seq={}", id, seq));
    }
    Some(s)
}

fn summarize_arp(node: &ProtocolNode) -> Option<String> {
    let src_ip = node.get("arp.src.proto_ipv4")?;
    let dst_ip = node.get("arp.dst.proto_ipv4")?;
    match node.get("arp.opcode").map(str::trim) {
        Some("1") => Some(format!("Who has {}? Tell {}", dst_ip, src_ip)),
        Some("2") => {
            let mac = node.get("arp.src.hw_mac").unwrap_or("");
            Some(format!("{} is at {}", src_ip, mac))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_tree() -> ProtocolNode {
        let mut frame = ProtocolNode::new("frame");
        frame.add_field("frame.number", "7");
        frame.add_field("frame.len", "60");
        frame.add_field("frame.time_epoch", "1700000000.250000000");
        let mut eth = ProtocolNode::new("eth");
        eth.add_field("eth.src", "66:77:88:99:aa:bb");
        eth.add_field("eth.dst", "00:11:22:33:44:55");
        let mut ip = ProtocolNode::new("ip");
        ip.add_field("ip.src", "10.0.0.1");
        ip.add_field("ip.dst", "10.0.0.2");
        ip.add_field("ip.len", "40");
        let mut tcp = ProtocolNode::new("tcp");
        tcp.add_field("tcp.srcport", "443");
        tcp.add_field("tcp.dstport", "51000");
        tcp.add_field("tcp.flags", "0x012");
        tcp.add_field("tcp.seq", "0");
        tcp.add_field("tcp.ack", "1");
        tcp.add_field("tcp.window_size_value", "65535");
        frame.with_child(eth.with_child(ip.with_child(tcp)))
    }

    #[test]
    fn meta_from_tcp_tree() {
        let meta = extract_meta(&tcp_tree());
        assert_eq!(meta.number, 7);
        assert_eq!(meta.protocol, "tcp");
        assert_eq!(meta.src_ip, "10.0.0.1");
        assert_eq!(meta.dst_ip, "10.0.0.2");
        assert_eq!(meta.src_port, Some(443));
        assert_eq!(meta.dst_port, Some(51000));
        // frame length comes first
        assert_eq!(meta.length, 60);
        assert_eq!(meta.timestamp, "2023-11-14T22:13:20.250000Z");
        assert_eq!(meta.info, "443 → 51000 [SYN, ACK] Seq=0 Ack=1 Win=65535");
    }

    #[test]
    fn meta_link_layer_fallback() {
        let mut eth = ProtocolNode::new("eth");
        eth.add_field("eth.src", "66:77:88:99:aa:bb");
        eth.add_field("eth.dst", "ff:ff:ff:ff:ff:ff");
        let meta = extract_meta(&eth);
        assert_eq!(meta.src_ip, "66:77:88:99:aa:bb");
        assert_eq!(meta.dst_ip, "ff:ff:ff:ff:ff:ff");
        assert_eq!(meta.length, 0);
        assert!(!meta.timestamp.is_empty());
        assert_eq!(meta.src_port, None);
    }

    #[test]
    fn meta_info_column_wins() {
        let mut frame = ProtocolNode::new("frame");
        frame.add_field("_ws.col.info", "custom summary");
        let mut ip = ProtocolNode::new("ip");
        ip.add_field("ip.src", "10.0.0.1");
        ip.add_field("ip.dst", "10.0.0.2");
        ip.add_field("ip.len", "84");
        let meta = extract_meta(&frame.with_child(ip));
        assert_eq!(meta.info, "custom summary");
        assert_eq!(meta.length, 84);
    }

    #[test]
    fn meta_unparsable_values() {
        let mut udp = ProtocolNode::new("udp");
        udp.add_field("udp.srcport", "domain");
        let meta = extract_meta(&udp);
        assert_eq!(meta.src_port, None);
        assert_eq!(meta.protocol, "udp");
    }

    #[test]
    fn summaries() {
        let mut dns = ProtocolNode::new("dns");
        dns.add_field("dns.id", "0x1a2b");
        dns.add_field("dns.flags.response", "0");
        dns.add_field("dns.qry.type", "1");
        dns.add_field("dns.qry.name", "example.com");
        assert_eq!(
            summarize(&dns).as_deref(),
            Some("Standard query 0x1a2b A example.com")
        );

        let mut http = ProtocolNode::new("http");
        http.add_field("http.request.method", "GET");
        http.add_field("http.request.uri", "/index.html");
        http.add_field("http.request.version", "HTTP/1.1");
        assert_eq!(summarize(&http).as_deref(), Some("GET /index.html HTTP/1.1"));

        let mut arp = ProtocolNode::new("arp");
        arp.add_field("arp.opcode", "1");
        arp.add_field("arp.src.proto_ipv4", "10.0.0.2");
        arp.add_field("arp.dst.proto_ipv4", "10.0.0.1");
        assert_eq!(summarize(&arp).as_deref(), Some("Who has 10.0.0.1? Tell 10.0.0.2"));

        assert_eq!(summarize(&ProtocolNode::new("data")), None);
    }

    #[test]
    fn meta_serialization_skips_empty() {
        let meta = PacketMeta {
            number: 1,
            timestamp: "t".to_string(),
            length: 10,
            ..PacketMeta::default()
        };
        let json = serde_json::to_string(&meta).expect("json");
        assert_eq!(json, r#"{"number":1,"timestamp":"t","length":10}"#);
    }
}
