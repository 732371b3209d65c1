use std::io::{self, Write};
use std::net::Ipv6Addr;

use libwirecrab_capture::PacketDetails;
use libwirecrab_dissect::{DissectorRegistry, PacketMeta, PacketRecord};

fn endpoint(ip: &str, port: Option<u16>) -> String {
    match port {
        Some(p) if ip.parse::<Ipv6Addr>().is_ok() => format!("[{}]:{}", ip, p),
        Some(p) => format!("{}:{}", ip, p),
        None => ip.to_string(),
    }
}

/// One line per record, in columns
pub fn format_record(meta: &PacketMeta) -> String {
    format!(
        "{:>7} {:<27} {:<45} {:<45} {:<8} {:>6} {}",
        meta.number,
        meta.timestamp,
        endpoint(&meta.src_ip, meta.src_port),
        endpoint(&meta.dst_ip, meta.dst_port),
        meta.protocol,
        meta.length,
        meta.info
    )
}

pub fn print_record<W: Write>(out: &mut W, record: &PacketRecord, json: bool) -> io::Result<()> {
    if json {
        serde_json::to_writer(&mut *out, record)?;
        writeln!(out)
    } else {
        writeln!(out, "{}", format_record(&record.meta))
    }
}

pub fn print_details<W: Write>(out: &mut W, details: &PacketDetails, json: bool) -> io::Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, details)?;
        return writeln!(out);
    }
    writeln!(out, "Frame {}", details.number)?;
    for (depth, node) in details.tree.iter().enumerate() {
        let indent = "  ".repeat(depth);
        writeln!(out, "{}{}", indent, node.name)?;
        for (key, field) in &node.fields {
            match (field.byte_offset, field.byte_length) {
                (Some(o), Some(l)) => writeln!(out, "{}    {}: {} [{}+{}]", indent, key, field.value, o, l)?,
                _ => writeln!(out, "{}    {}: {}", indent, key, field.value)?,
            }
        }
    }
    writeln!(out)?;
    writeln!(out, "{}", details.hex_dump)
}

pub fn print_dissectors<W: Write>(out: &mut W, registry: &DissectorRegistry) -> io::Result<()> {
    writeln!(out, "wirecrab dissectors:")?;
    for d in registry.iter_dissectors() {
        match registry.layer_of(d.name()) {
            Some(layer) => writeln!(out, "    {:<8} {}", d.name(), layer)?,
            None => writeln!(out, "    {}", d.name())?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints() {
        assert_eq!(endpoint("10.0.0.1", Some(80)), "10.0.0.1:80");
        assert_eq!(endpoint("10.0.0.1", None), "10.0.0.1");
        assert_eq!(endpoint("fe80::1", Some(53)), "[fe80::1]:53");
        assert_eq!(endpoint("00:11:22:33:44:55", None), "00:11:22:33:44:55");
        assert_eq!(endpoint("", None), "");
    }

    #[test]
    fn record_line() {
        let meta = PacketMeta {
            number: 3,
            timestamp: "2023-11-14T22:13:20.000000Z".to_string(),
            src_ip: "10.0.0.2".to_string(),
            dst_ip: "10.0.0.1".to_string(),
            src_port: Some(51000),
            dst_port: Some(80),
            protocol: "http".to_string(),
            length: 120,
            info: "GET / HTTP/1.1".to_string(),
        };
        let line = format_record(&meta);
        assert!(line.trim_start().starts_with("3 2023-11-14T22:13:20"));
        assert!(line.contains("10.0.0.2:51000"));
        assert!(line.ends_with("GET / HTTP/1.1"));
    }
}
