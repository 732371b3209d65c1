use crate::default_dissector_builder;
use crate::dissector::{Dissection, Dissector, MatchContext};
use crate::error::DissectError;
use crate::layer::Layer;

const HTTP_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "CONNECT", "TRACE",
];

/// Maximum number of header lines decoded
const MAX_HEADERS: usize = 64;

/// HTTP/1.x start line and headers
#[derive(Default)]
pub struct HttpDissector;

default_dissector_builder!(HttpDissector, HttpBuilder, "http", Layer::Application);

fn is_response_line(line: &[u8]) -> bool {
    line.starts_with(b"HTTP/1.")
}

fn is_request_line(line: &[u8]) -> bool {
    HTTP_METHODS.iter().any(|m| {
        line.len() > m.len() && line.starts_with(m.as_bytes()) && line[m.len()] == b' '
    })
}

/// Split `data` in lines, returning each line (without CRLF) and its offset
fn lines(data: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    let mut offset = 0;
    std::iter::from_fn(move || {
        if offset >= data.len() {
            return None;
        }
        let rest = &data[offset..];
        let (line, consumed) = match rest.iter().position(|&b| b == b'\n') {
            Some(i) => (&rest[..i], i + 1),
            None => (rest, rest.len()),
        };
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let start = offset;
        offset += consumed;
        Some((start, line))
    })
}

impl Dissector for HttpDissector {
    fn name(&self) -> &'static str {
        "http"
    }

    fn matches(&self, payload: &[u8], ctx: &MatchContext) -> bool {
        if ctx.hint.is_some() && !ctx.is_hinted("http") {
            return false;
        }
        is_request_line(payload) || is_response_line(payload)
    }

    fn parse<'a>(&self, payload: &'a [u8]) -> Result<Dissection<'a>, DissectError> {
        let mut it = lines(payload);
        let (_, start_line) = it.next().ok_or(DissectError::Truncated {
            protocol: "http",
            needed: 1,
            available: 0,
        })?;
        let start_line = std::str::from_utf8(start_line).map_err(|_| DissectError::Malformed {
            protocol: "http",
            reason: "start line is not valid UTF-8",
        })?;
        let mut parts = start_line.splitn(3, ' ');
        let (first, second, third) = match (parts.next(), parts.next(), parts.next()) {
            (Some(a), Some(b), c) => (a, b, c.unwrap_or("")),
            _ => {
                return Err(DissectError::Malformed {
                    protocol: "http",
                    reason: "invalid start line",
                })
            }
        };

        let mut d = Dissection::new();
        if first.starts_with("HTTP/") {
            if second.len() != 3 || !second.bytes().all(|b| b.is_ascii_digit()) {
                return Err(DissectError::Malformed {
                    protocol: "http",
                    reason: "invalid status code",
                });
            }
            d.computed("http.response", "1");
            d.field("http.response.version", first, 0, first.len());
            d.field("http.response.code", second, first.len() + 1, second.len());
            d.field("http.response.phrase", third, first.len() + second.len() + 2, third.len());
        } else {
            d.computed("http.request", "1");
            d.field("http.request.method", first, 0, first.len());
            d.field("http.request.uri", second, first.len() + 1, second.len());
            d.field("http.request.version", third, first.len() + second.len() + 2, third.len());
        }

        for (offset, line) in it.take(MAX_HEADERS) {
            if line.is_empty() {
                break;
            }
            let line = match std::str::from_utf8(line) {
                Ok(l) => l,
                Err(_) => continue,
            };
            if let Some((name, value)) = line.split_once(':') {
                let key = format!("http.{}", name.trim().to_ascii_lowercase().replace('-', "_"));
                d.field(key, value.trim(), offset, line.len());
            }
        }
        Ok(d)
    }
}
