use std::io::BufRead;

use libwirecrab_dissect::ProtocolNode;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::StreamFrameParser;
use crate::error::StreamError;

/// Upper bound on the size of one buffered packet
pub const MAX_PDML_CHUNK_SIZE: usize = 16 * 1024 * 1024;

const PACKET_START: &str = "<packet";
const PACKET_END: &str = "</packet>";
const PDML_END: &str = "</pdml>";

/// Pseudo protocol holding capture information, not a layer
const GENINFO: &str = "geninfo";

/// Decode the first `<packet>` element found in `chunk`
///
/// Returns `Ok(None)` if the chunk holds no packet (document header, trailer).
pub fn decode_pdml_packet(chunk: &str) -> Result<Option<ProtocolNode>, StreamError> {
    let start = match chunk.find(PACKET_START) {
        Some(s) => s,
        None => return Ok(None),
    };
    let end = match chunk[start..].find(PACKET_END) {
        Some(e) => start + e + PACKET_END.len(),
        None => return Err(StreamError::Malformed("unterminated <packet> element".to_string())),
    };

    let mut reader = Reader::from_str(&chunk[start..end]);
    reader.config_mut().trim_text(true);

    let mut protos: Vec<ProtocolNode> = Vec::new();
    let mut current: Option<ProtocolNode> = None;
    // number of open <proto> elements
    let mut proto_depth = 0usize;
    // true while inside a top-level proto that is not kept
    let mut skipping = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| StreamError::Malformed(format!("XML error at {}: {}", reader.buffer_position(), e)))?;
        match event {
            Event::Start(e) => match e.name().as_ref() {
                b"proto" => {
                    if proto_depth == 0 {
                        let name = proto_name(&e)?;
                        skipping = name == GENINFO;
                        if !skipping {
                            current = Some(ProtocolNode::new(name));
                        }
                    }
                    proto_depth += 1;
                }
                b"field" if proto_depth == 1 && !skipping => {
                    if let Some(node) = current.as_mut() {
                        add_pdml_field(node, &e)?;
                    }
                }
                _ => (),
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"proto" if proto_depth == 0 => {
                    let name = proto_name(&e)?;
                    if name != GENINFO {
                        protos.push(ProtocolNode::new(name));
                    }
                }
                b"field" if proto_depth == 1 && !skipping => {
                    if let Some(node) = current.as_mut() {
                        add_pdml_field(node, &e)?;
                    }
                }
                _ => (),
            },
            Event::End(e) => {
                if e.name().as_ref() == b"proto" {
                    proto_depth = proto_depth.saturating_sub(1);
                    if proto_depth == 0 {
                        if let Some(node) = current.take() {
                            protos.push(node);
                        }
                        skipping = false;
                    }
                }
            }
            Event::Eof => break,
            _ => (),
        }
    }

    if protos.is_empty() {
        return Err(StreamError::Malformed("packet without protocols".to_string()));
    }
    Ok(chain(protos))
}

fn chain(protos: Vec<ProtocolNode>) -> Option<ProtocolNode> {
    protos.into_iter().rev().fold(None, |child, mut node| {
        if let Some(child) = child {
            node.child = Some(Box::new(child));
        }
        Some(node)
    })
}

fn attribute(e: &BytesStart, key: &[u8]) -> Result<Option<String>, StreamError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| StreamError::Malformed(format!("invalid attribute: {}", e)))?;
        if attr.key.as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|e| StreamError::Malformed(format!("invalid attribute value: {}", e)))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn proto_name(e: &BytesStart) -> Result<String, StreamError> {
    Ok(attribute(e, b"name")?.unwrap_or_default().to_lowercase())
}

fn add_pdml_field(node: &mut ProtocolNode, e: &BytesStart) -> Result<(), StreamError> {
    let name = match attribute(e, b"name")? {
        Some(n) if !n.is_empty() => n.to_lowercase(),
        _ => return Ok(()),
    };
    let value = match attribute(e, b"show")? {
        Some(v) => v,
        None => attribute(e, b"value")?.unwrap_or_default(),
    };
    let pos = attribute(e, b"pos")?.and_then(|p| p.parse::<usize>().ok());
    let size = attribute(e, b"size")?.and_then(|s| s.parse::<usize>().ok());
    match (pos, size) {
        (Some(pos), Some(size)) => node.add_positioned_field(name, value, pos, size),
        _ => node.add_field(name, value),
    }
    Ok(())
}

/// Decode hex bytes as shown by the decoder (`47:45:54` or `474554`)
pub fn decode_hex(s: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = s
        .bytes()
        .filter(|b| *b != b':' && !b.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}

/// Parser for the structured-tree output (`tshark -T pdml`)
///
/// Lines are accumulated until the end of a packet, then the buffered chunk is decoded.
pub struct PdmlParser<R> {
    reader: R,
    line: Vec<u8>,
    chunk: String,
    finished: bool,
}

impl<R: BufRead> PdmlParser<R> {
    pub fn new(reader: R) -> Self {
        PdmlParser {
            reader,
            line: Vec::new(),
            chunk: String::new(),
            finished: false,
        }
    }
}

impl<R: BufRead + Send> StreamFrameParser for PdmlParser<R> {
    fn next_node(&mut self) -> Result<Option<ProtocolNode>, StreamError> {
        loop {
            if self.finished {
                return Ok(None);
            }
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line)? == 0 {
                self.finished = true;
                let partial = self.chunk.contains(PACKET_START);
                self.chunk.clear();
                if partial {
                    return Err(StreamError::Truncated);
                }
                return Ok(None);
            }
            let line = String::from_utf8_lossy(&self.line);
            let boundary = line.contains(PACKET_END) || line.contains(PDML_END);
            self.chunk.push_str(&line);

            if boundary {
                let chunk = std::mem::take(&mut self.chunk);
                match decode_pdml_packet(&chunk) {
                    Ok(Some(node)) => return Ok(Some(node)),
                    Ok(None) => continue,
                    Err(e) => return Err(e),
                }
            }
            if self.chunk.len() > MAX_PDML_CHUNK_SIZE {
                self.chunk.clear();
                return Err(StreamError::Malformed(format!(
                    "packet larger than {} bytes",
                    MAX_PDML_CHUNK_SIZE
                )));
            }
        }
    }
}
