use std::net::{Ipv4Addr, Ipv6Addr};

use crate::default_dissector_builder;
use crate::dissector::{Dissection, Dissector, MatchContext};
use crate::error::DissectError;
use crate::layer::Layer;

const DNS_HEADER_LEN: usize = 12;
const DNS_PORTS: &[u16] = &[53, 5353];
/// Maximum number of compression pointers followed while reading a name
const MAX_POINTER_JUMPS: usize = 16;
const MAX_NAME_LEN: usize = 255;

/// Mnemonic of a DNS record type
pub fn dns_type_name(rtype: u16) -> Option<&'static str> {
    let name = match rtype {
        1 => "A",
        2 => "NS",
        5 => "CNAME",
        6 => "SOA",
        12 => "PTR",
        15 => "MX",
        16 => "TXT",
        28 => "AAAA",
        33 => "SRV",
        64 => "SVCB",
        65 => "HTTPS",
        255 => "ANY",
        _ => return None,
    };
    Some(name)
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let b = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

/// Read a (possibly compressed) domain name starting at `offset`
///
/// Returns the name and the offset following it in the message.
fn read_name(msg: &[u8], offset: usize) -> Result<(String, usize), DissectError> {
    let malformed = |reason| DissectError::Malformed {
        protocol: "dns",
        reason,
    };
    let mut labels: Vec<String> = Vec::new();
    let mut pos = offset;
    let mut end = None;
    let mut jumps = 0;
    let mut name_len = 0;
    loop {
        let len = *msg.get(pos).ok_or_else(|| malformed("name outside of message"))?;
        match len & 0xc0 {
            0x00 => {
                if len == 0 {
                    let next = end.unwrap_or(pos + 1);
                    let name = if labels.is_empty() {
                        "<Root>".to_string()
                    } else {
                        labels.join(".")
                    };
                    return Ok((name, next));
                }
                let start = pos + 1;
                let label = msg
                    .get(start..start + usize::from(len))
                    .ok_or_else(|| malformed("label outside of message"))?;
                name_len += label.len() + 1;
                if name_len > MAX_NAME_LEN {
                    return Err(malformed("name too long"));
                }
                labels.push(String::from_utf8_lossy(label).into_owned());
                pos = start + usize::from(len);
            }
            0xc0 => {
                let target = read_u16(msg, pos).ok_or_else(|| malformed("truncated pointer"))? & 0x3fff;
                jumps += 1;
                if jumps > MAX_POINTER_JUMPS {
                    return Err(malformed("too many compression pointers"));
                }
                if end.is_none() {
                    end = Some(pos + 2);
                }
                pos = usize::from(target);
            }
            _ => return Err(malformed("unsupported label type")),
        }
    }
}

#[derive(Default)]
pub struct DnsDissector;

default_dissector_builder!(DnsDissector, DnsBuilder, "dns", Layer::Application);

impl DnsDissector {
    /// Decode the first answer record of the A, AAAA or CNAME type
    fn parse_answers(d: &mut Dissection, msg: &[u8], mut pos: usize, count: u16) {
        for _ in 0..count {
            let (name, next) = match read_name(msg, pos) {
                Ok(r) => r,
                Err(_) => return,
            };
            let (rtype, rdlen) = match (read_u16(msg, next), read_u16(msg, next + 8)) {
                (Some(t), Some(l)) => (t, usize::from(l)),
                _ => return,
            };
            let rdata_start = next + 10;
            let rdata = match msg.get(rdata_start..rdata_start + rdlen) {
                Some(r) => r,
                None => return,
            };
            d.field("dns.resp.name", name, pos, next - pos);
            match (rtype, rdata.len()) {
                (1, 4) => {
                    let a = Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]);
                    d.field("dns.a", a.to_string(), rdata_start, 4);
                }
                (28, 16) => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(rdata);
                    d.field("dns.aaaa", Ipv6Addr::from(octets).to_string(), rdata_start, 16);
                }
                (5, _) => {
                    if let Ok((cname, _)) = read_name(msg, rdata_start) {
                        d.field("dns.cname", cname, rdata_start, rdlen);
                    }
                }
                _ => (),
            }
            pos = rdata_start + rdlen;
        }
    }
}

impl Dissector for DnsDissector {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn matches(&self, payload: &[u8], ctx: &MatchContext) -> bool {
        if payload.len() < DNS_HEADER_LEN {
            return false;
        }
        if ctx.is_hinted("dns") {
            return true;
        }
        let opcode = (payload[2] >> 3) & 0x0f;
        let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
        ctx.has_port(DNS_PORTS) && opcode <= 6 && qdcount <= 32
    }

    fn parse<'a>(&self, payload: &'a [u8]) -> Result<Dissection<'a>, DissectError> {
        DissectError::check_len("dns", payload, DNS_HEADER_LEN)?;
        let id = u16::from_be_bytes([payload[0], payload[1]]);
        let flags = u16::from_be_bytes([payload[2], payload[3]]);
        let qdcount = u16::from_be_bytes([payload[4], payload[5]]);
        let ancount = u16::from_be_bytes([payload[6], payload[7]]);
        let nscount = u16::from_be_bytes([payload[8], payload[9]]);
        let arcount = u16::from_be_bytes([payload[10], payload[11]]);

        let mut d = Dissection::new();
        d.field("dns.id", format!("0x{:04x}", id), 0, 2);
        d.field("dns.flags", format!("0x{:04x}", flags), 2, 2);
        d.field("dns.flags.response", (flags >> 15).to_string(), 2, 1);
        d.field("dns.flags.opcode", ((flags >> 11) & 0x0f).to_string(), 2, 1);
        d.field("dns.flags.rcode", (flags & 0x0f).to_string(), 3, 1);
        d.field("dns.count.queries", qdcount.to_string(), 4, 2);
        d.field("dns.count.answers", ancount.to_string(), 6, 2);
        d.field("dns.count.auth_rr", nscount.to_string(), 8, 2);
        d.field("dns.count.add_rr", arcount.to_string(), 10, 2);

        let mut pos = DNS_HEADER_LEN;
        for i in 0..qdcount {
            let (name, next) = read_name(payload, pos)?;
            let qtype = read_u16(payload, next);
            let qclass = read_u16(payload, next + 2);
            let (qtype, qclass) = match (qtype, qclass) {
                (Some(t), Some(c)) => (t, c),
                _ => {
                    return Err(DissectError::Truncated {
                        protocol: "dns",
                        needed: next + 4,
                        available: payload.len(),
                    })
                }
            };
            if i == 0 {
                d.field("dns.qry.name", name, pos, next - pos);
                d.field("dns.qry.type", qtype.to_string(), next, 2);
                d.field("dns.qry.class", format!("0x{:04x}", qclass), next + 2, 2);
            }
            pos = next + 4;
        }
        Self::parse_answers(&mut d, payload, pos, ancount);
        Ok(d)
    }
}
