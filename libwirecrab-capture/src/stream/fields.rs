use std::io::BufRead;
use std::net::{Ipv4Addr, Ipv6Addr};

use libwirecrab_dissect::ProtocolNode;

use super::StreamFrameParser;
use crate::error::StreamError;

/// Separator between columns
pub const FIELDS_SEPARATOR: char = '|';
/// Columns: frame number, protocol, source, destination, length, summary
const FIELDS_COUNT: usize = 6;

/// Decode one line of the flat-fields output
///
/// The summary is the last column and may itself contain the separator.
pub fn decode_fields_line(line: &str) -> Result<ProtocolNode, StreamError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let parts: Vec<&str> = line.splitn(FIELDS_COUNT, FIELDS_SEPARATOR).collect();
    if parts.len() < FIELDS_COUNT {
        return Err(StreamError::MissingFields {
            expected: FIELDS_COUNT,
            found: parts.len(),
        });
    }
    let number: u64 = parts[0]
        .trim()
        .parse()
        .map_err(|_| StreamError::Malformed(format!("invalid frame number '{}'", parts[0])))?;
    let length: u32 = parts[4]
        .trim()
        .parse()
        .map_err(|_| StreamError::Malformed(format!("invalid frame length '{}'", parts[4])))?;
    let protocol = parts[1].trim();
    let source = parts[2].trim();
    let destination = parts[3].trim();
    let summary = parts[5];

    let mut frame = ProtocolNode::new("frame");
    frame.add_field("frame.number", number.to_string());
    frame.add_field("frame.len", length.to_string());
    frame.add_field("_ws.col.protocol", protocol);
    frame.add_field("_ws.col.info", summary);

    let address_node = if source.is_empty() && destination.is_empty() {
        None
    } else {
        let name = if source.parse::<Ipv4Addr>().is_ok() && destination.parse::<Ipv4Addr>().is_ok() {
            "ip"
        } else if source.parse::<Ipv6Addr>().is_ok() && destination.parse::<Ipv6Addr>().is_ok() {
            "ipv6"
        } else {
            "eth"
        };
        let mut node = ProtocolNode::new(name);
        node.add_field(format!("{}.src", name), source);
        node.add_field(format!("{}.dst", name), destination);
        Some(node)
    };

    let protocol_name = if protocol.is_empty() {
        "unknown".to_string()
    } else {
        protocol.to_lowercase()
    };

    let protocol_node = match &address_node {
        Some(a) if a.name == protocol_name => None,
        _ => Some(ProtocolNode::new(protocol_name)),
    };

    let tree = match (address_node, protocol_node) {
        (Some(a), Some(p)) => Some(a.with_child(p)),
        (Some(a), None) => Some(a),
        (None, p) => p,
    };
    if let Some(tree) = tree {
        frame = frame.with_child(tree);
    }
    Ok(frame)
}

/// Parser for the flat-fields output (`tshark -T fields`), one packet per line
pub struct FieldsParser<R> {
    reader: R,
    line: Vec<u8>,
}

impl<R: BufRead> FieldsParser<R> {
    pub fn new(reader: R) -> Self {
        FieldsParser {
            reader,
            line: Vec::new(),
        }
    }
}

impl<R: BufRead + Send> StreamFrameParser for FieldsParser<R> {
    fn next_node(&mut self) -> Result<Option<ProtocolNode>, StreamError> {
        loop {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(None);
            }
            let line = String::from_utf8_lossy(&self.line);
            if line.trim().is_empty() {
                continue;
            }
            return decode_fields_line(&line).map(Some);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn fields_line() {
        let node = decode_fields_line("12|TCP|10.0.0.1|10.0.0.2|60|443 → 51000 [ACK]\n").expect("line");
        assert_eq!(node.protocols(), "frame:ip:tcp");
        assert_eq!(node.get("frame.number"), Some("12"));
        assert_eq!(node.get("frame.len"), Some("60"));
        assert_eq!(node.get("_ws.col.info"), Some("443 → 51000 [ACK]"));
        let ip = node.find("ip").expect("ip");
        assert_eq!(ip.get("ip.src"), Some("10.0.0.1"));
        assert_eq!(ip.get("ip.dst"), Some("10.0.0.2"));
    }

    #[test]
    fn fields_summary_with_separator() {
        let node = decode_fields_line("1|HTTP|fe80::1|fe80::2|90|GET /a|b HTTP/1.1").expect("line");
        assert_eq!(node.protocols(), "frame:ipv6:http");
        assert_eq!(node.get("_ws.col.info"), Some("GET /a|b HTTP/1.1"));
    }

    #[test]
    fn fields_link_layer_and_empty_columns() {
        let node = decode_fields_line("3|ARP|aa:bb:cc:dd:ee:ff|Broadcast|42|Who has 10.0.0.1?").expect("line");
        assert_eq!(node.protocols(), "frame:eth:arp");
        let node = decode_fields_line("4|||| 42|").expect("line");
        assert_eq!(node.protocols(), "frame:unknown");
        let node = decode_fields_line("5|IPv6|fe80::1|fe80::2|70|").expect("line");
        assert_eq!(node.protocols(), "frame:ipv6");
    }

    #[test]
    fn fields_errors() {
        assert!(matches!(
            decode_fields_line("1|TCP|10.0.0.1"),
            Err(StreamError::MissingFields { expected: 6, found: 3 })
        ));
        assert!(matches!(
            decode_fields_line("x|TCP|a|b|60|info"),
            Err(StreamError::Malformed(_))
        ));
        assert!(matches!(
            decode_fields_line("1|TCP|a|b|sixty|info"),
            Err(StreamError::Malformed(_))
        ));
    }

    #[test]
    fn fields_parser_recovers() {
        let input = "1|UDP|10.0.0.1|10.0.0.2|80|a\n\nbroken line\n2|UDP|10.0.0.1|10.0.0.2|81|b\n";
        let mut parser = FieldsParser::new(Cursor::new(input));
        let first = parser.next_node().expect("first").expect("node");
        assert_eq!(first.get("frame.number"), Some("1"));
        let err = parser.next_node().expect_err("short line");
        assert!(err.is_recoverable());
        let second = parser.next_node().expect("second").expect("node");
        assert_eq!(second.get("frame.len"), Some("81"));
        assert!(parser.next_node().expect("eof").is_none());
    }
}
