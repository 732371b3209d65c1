use pnet_packet::tcp::TcpPacket;

use crate::default_dissector_builder;
use crate::dissector::{Dissection, Dissector, MatchContext};
use crate::error::DissectError;
use crate::layer::Layer;

const TCP_MIN_HEADER_LEN: usize = 20;

const TCP_FLAG_NAMES: &[(u16, &str)] = &[
    (0x001, "FIN"),
    (0x002, "SYN"),
    (0x004, "RST"),
    (0x008, "PSH"),
    (0x010, "ACK"),
    (0x020, "URG"),
    (0x040, "ECE"),
    (0x080, "CWR"),
    (0x100, "NS"),
];

/// Names of the flags set in `flags`, lowest bit first
pub fn tcp_flag_names(flags: u16) -> Vec<&'static str> {
    TCP_FLAG_NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

#[derive(Default)]
pub struct TcpDissector;

default_dissector_builder!(TcpDissector, TcpBuilder, "tcp", Layer::Transport);

impl Dissector for TcpDissector {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn matches(&self, payload: &[u8], ctx: &MatchContext) -> bool {
        ctx.is_hinted("tcp") && payload.len() >= TCP_MIN_HEADER_LEN
    }

    fn parse<'a>(&self, payload: &'a [u8]) -> Result<Dissection<'a>, DissectError> {
        let tcp = TcpPacket::new(payload).ok_or(DissectError::Truncated {
            protocol: "tcp",
            needed: TCP_MIN_HEADER_LEN,
            available: payload.len(),
        })?;
        let hdr_len = usize::from(tcp.get_data_offset()) * 4;
        if hdr_len < TCP_MIN_HEADER_LEN {
            return Err(DissectError::Malformed {
                protocol: "tcp",
                reason: "data offset below minimum",
            });
        }
        DissectError::check_len("tcp", payload, hdr_len)?;
        let src_port = tcp.get_source();
        let dst_port = tcp.get_destination();
        let flags = (u16::from(payload[12] & 0x01) << 8) | u16::from(payload[13]);

        let mut d = Dissection::new();
        d.field("tcp.srcport", src_port.to_string(), 0, 2);
        d.field("tcp.dstport", dst_port.to_string(), 2, 2);
        d.field("tcp.seq", tcp.get_sequence().to_string(), 4, 4);
        d.field("tcp.ack", tcp.get_acknowledgement().to_string(), 8, 4);
        d.field("tcp.hdr_len", hdr_len.to_string(), 12, 1);
        d.field("tcp.flags", format!("0x{:03x}", flags), 12, 2);
        d.field("tcp.window_size_value", tcp.get_window().to_string(), 14, 2);
        d.field("tcp.checksum", format!("0x{:04x}", tcp.get_checksum()), 16, 2);
        d.field("tcp.urgent_pointer", tcp.get_urgent_ptr().to_string(), 18, 2);
        d.computed("tcp.len", (payload.len() - hdr_len).to_string());

        d.ports = Some((src_port, dst_port));
        if payload.len() > hdr_len {
            d.payload = Some(&payload[hdr_len..]);
        }
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 443 -> 51000, SYN+ACK, seq 0, ack 1, window 65535
    const SYN_ACK: &[u8] = &[
        0x01, 0xbb, 0xc7, 0x38, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x50, 0x12, 0xff,
        0xff, 0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn tcp_parse() {
        assert!(TcpDissector.matches(SYN_ACK, &MatchContext::with_hint("tcp")));
        assert!(!TcpDissector.matches(SYN_ACK, &MatchContext::default()));
        let d = TcpDissector.parse(SYN_ACK).expect("parse");
        assert_eq!(d.fields["tcp.srcport"].value, "443");
        assert_eq!(d.fields["tcp.dstport"].value, "51000");
        assert_eq!(d.fields["tcp.flags"].value, "0x012");
        assert_eq!(d.fields["tcp.len"].value, "0");
        assert_eq!(d.ports, Some((443, 51000)));
        assert!(d.payload.is_none());
    }

    #[test]
    fn tcp_payload_after_options() {
        let mut data = SYN_ACK.to_vec();
        data[12] = 0x60; // 24 bytes header
        data.extend_from_slice(&[1, 1, 1, 1, b'x', b'y']);
        let d = TcpDissector.parse(&data).expect("parse");
        assert_eq!(d.payload, Some(&b"xy"[..]));
    }

    #[test]
    fn tcp_bad_offset() {
        let mut data = SYN_ACK.to_vec();
        data[12] = 0x20;
        assert!(TcpDissector.parse(&data).is_err());
    }

    #[test]
    fn tcp_flags() {
        assert_eq!(tcp_flag_names(0x012), vec!["SYN", "ACK"]);
        assert_eq!(tcp_flag_names(0x011), vec!["FIN", "ACK"]);
        assert!(tcp_flag_names(0).is_empty());
    }
}
