use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use libwirecrab_capture::stream::{decode_pdml_packet, FieldsParser, PdmlParser, StreamFrameParser};
use libwirecrab_capture::{CaptureError, CaptureService, DetailsError, SessionState, StreamError};
use libwirecrab_tools::{Config, Duration, Linktype, RawFrame, RecordingWriter};

fn udp_frame(number: u64, src_port: u16) -> RawFrame {
    let payload = b"hello";
    let mut ip = vec![0x45, 0x00];
    ip.extend_from_slice(&((20 + 8 + payload.len()) as u16).to_be_bytes());
    ip.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 64, 17, 0x00, 0x00]);
    ip.extend_from_slice(&[192, 168, 1, 10]);
    ip.extend_from_slice(&[192, 168, 1, 20]);
    let mut sum = 0u32;
    for chunk in ip.chunks(2) {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    let checksum = !(sum as u16);
    ip[10..12].copy_from_slice(&checksum.to_be_bytes());
    ip.extend_from_slice(&src_port.to_be_bytes());
    ip.extend_from_slice(&9999u16.to_be_bytes());
    ip.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    ip.extend_from_slice(&[0x00, 0x00]);
    ip.extend_from_slice(payload);

    let mut data = vec![0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0x08, 0x00];
    data.extend_from_slice(&ip);
    RawFrame::new(number, Duration::new(1_700_000_000, number as u32), Linktype::ETHERNET, &data, 65535)
}

fn write_capture(path: &Path, count: u64) {
    let mut writer = RecordingWriter::new(File::create(path).expect("create"));
    writer.init_file(65535, Linktype::ETHERNET).expect("header");
    for n in 1..=count {
        writer.write_frame(&udp_frame(n, 40000 + n as u16)).expect("write");
    }
}

fn replay_service() -> CaptureService {
    let mut config = Config::default();
    config.set("capture.backend", "replay");
    CaptureService::new(&config).expect("service")
}

fn wait_until_done(service: &CaptureService) {
    let deadline = Instant::now() + StdDuration::from_secs(10);
    while service.is_capturing() && Instant::now() < deadline {
        thread::sleep(StdDuration::from_millis(10));
    }
}

#[test]
fn replay_capture_and_details() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("three.pcap");
    write_capture(&path, 3);

    let service = replay_service();
    service.start(path.to_str().expect("path")).expect("start");
    assert_eq!(service.state(), SessionState::Running);
    assert_eq!(service.device().as_deref(), path.to_str());
    wait_until_done(&service);

    assert_eq!(service.get_packet_count(), 3);
    let packets = service.get_packets(0, 10);
    let numbers: Vec<u64> = packets.iter().map(|p| p.meta.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    let meta = &packets[1].meta;
    assert_eq!(meta.protocol, "udp");
    assert_eq!(meta.src_ip, "192.168.1.10");
    assert_eq!(meta.dst_ip, "192.168.1.20");
    assert_eq!(meta.src_port, Some(40002));
    assert_eq!(meta.dst_port, Some(9999));
    assert_eq!(meta.length, 47);
    assert_eq!(service.get_packets(1, 1).len(), 1);
    assert!(service.get_packets(3, 10).is_empty());

    let details = service.get_packet_details(2).expect("details");
    assert_eq!(details.number, 2);
    assert_eq!(details.tree.protocols(), "frame:eth:ip:udp");
    assert!(details.hex_dump.starts_with("00000000"));
    assert!(matches!(
        service.get_packet_details(999999),
        Err(DetailsError::NotFound(999999))
    ));

    service.stop();
    assert_eq!(service.state(), SessionState::Idle);
    assert!(matches!(
        service.get_packet_details(2),
        Err(DetailsError::NoRecording)
    ));
    // records survive the end of the session
    assert_eq!(service.get_packet_count(), 3);
    service.clear();
    assert_eq!(service.get_packet_count(), 0);
}

#[test]
fn restart_clears_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = dir.path().join("first.pcap");
    let second = dir.path().join("second.pcap");
    write_capture(&first, 3);
    write_capture(&second, 2);

    let service = replay_service();
    service.start(first.to_str().expect("path")).expect("start");
    wait_until_done(&service);
    service.start(second.to_str().expect("path")).expect("restart");
    wait_until_done(&service);
    assert_eq!(service.get_packet_count(), 2);
    assert_eq!(service.get_packets(0, 1)[0].meta.number, 1);
}

#[test]
fn bounded_store_keeps_last_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("five.pcap");
    write_capture(&path, 5);

    let mut config = Config::default();
    config.set("capture.backend", "replay");
    config.set("store.capacity", 2i64);
    let service = CaptureService::new(&config).expect("service");
    service.start(path.to_str().expect("path")).expect("start");
    wait_until_done(&service);
    let numbers: Vec<u64> = service.get_packets(0, 10).iter().map(|p| p.meta.number).collect();
    assert_eq!(numbers, vec![4, 5]);
    assert_eq!(service.store().evicted(), 3);
}

#[test]
fn start_on_missing_device() {
    let service = CaptureService::new(&Config::default()).expect("service");
    assert!(matches!(
        service.start("nonexistent0"),
        Err(CaptureError::DeviceNotFound(_))
    ));
    assert_eq!(service.get_packet_count(), 0);
    assert_eq!(service.state(), SessionState::Idle);
    assert!(!service.is_capturing());
    assert!(matches!(
        service.get_packet_details(1),
        Err(DetailsError::NoRecording)
    ));
}

#[test]
fn stop_is_idempotent() {
    let service = replay_service();
    service.stop();
    service.stop();
    assert_eq!(service.state(), SessionState::Idle);

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("two.pcap");
    write_capture(&path, 2);
    service.start(path.to_str().expect("path")).expect("start");
    wait_until_done(&service);
    service.stop();
    service.stop();
    assert_eq!(service.state(), SessionState::Idle);
    assert!(!service.is_capturing());
    assert_eq!(service.get_packet_count(), 2);
}

/// Stand-in for the external decoder: prints flat-fields lines, then blocks
#[cfg(unix)]
const FAKE_DECODER: &str = "#!/bin/sh
printf '1|TCP|10.0.0.1|10.0.0.2|60|a\\nbad\\n2|UDP|10.0.0.1|10.0.0.2|61|b\\n3|DNS|10.0.0.1|10.0.0.2|62|c\\n'
exec sleep 1000
";

#[cfg(unix)]
#[test]
fn fields_backend_session() {
    use std::os::unix::fs::PermissionsExt;

    if libwirecrab_capture::find_interface("lo").is_err() {
        eprintln!("no loopback interface, skipping");
        return;
    }
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("fake-tshark");
    std::fs::write(&script, FAKE_DECODER).expect("write script");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");

    let mut config = Config::default();
    config.set("capture.backend", "fields");
    config.set("tshark.path", script.to_str().expect("path"));
    let service = CaptureService::new(&config).expect("service");

    // the script may still be open in a concurrently forked test process
    let mut attempts = 0;
    loop {
        match service.start("lo") {
            Ok(()) => break,
            Err(CaptureError::Launch { .. }) if attempts < 20 => {
                attempts += 1;
                thread::sleep(StdDuration::from_millis(50));
            }
            Err(e) => panic!("start failed: {}", e),
        }
    }
    assert_eq!(service.state(), SessionState::Running);

    let deadline = Instant::now() + StdDuration::from_secs(10);
    while service.get_packet_count() < 3 && Instant::now() < deadline {
        thread::sleep(StdDuration::from_millis(10));
    }
    let packets = service.get_packets(0, 10);
    let summary: Vec<(u64, &str, u32)> = packets
        .iter()
        .map(|p| (p.meta.number, p.meta.protocol.as_str(), p.meta.length))
        .collect();
    assert_eq!(summary, vec![(1, "tcp", 60), (2, "udp", 61), (3, "dns", 62)]);
    // the decoder is still running, blocked after its output
    assert!(service.is_capturing());

    service.stop();
    assert_eq!(service.state(), SessionState::Idle);
    assert!(!service.is_capturing());
    thread::sleep(StdDuration::from_millis(100));
    assert_eq!(service.get_packet_count(), 3);
    assert!(matches!(
        service.get_packet_details(1),
        Err(DetailsError::NoRecording)
    ));
    service.stop();
    assert_eq!(service.state(), SessionState::Idle);
}

const PDML_PACKET: &str = r#"<packet>
  <proto name="frame" size="54" pos="0">
    <field name="frame.number" show="7" size="0" pos="0"/>
    <field name="frame.len" show="54" size="0" pos="0"/>
  </proto>
  <proto name="eth" size="14" pos="0">
    <field name="eth.dst" show="ff:ff:ff:ff:ff:ff" size="6" pos="0"/>
    <field name="eth.src" show="00:11:22:33:44:55" size="6" pos="6"/>
    <field name="eth.type" show="0x0800" size="2" pos="12"/>
  </proto>
  <proto name="ip" size="20" pos="14">
    <field name="ip.proto" show="6" size="1" pos="23"/>
    <field name="ip.src" show="10.0.0.1" size="4" pos="26"/>
    <field name="ip.dst" show="10.0.0.2" size="4" pos="30"/>
  </proto>
  <proto name="tcp" size="20" pos="34">
    <field name="tcp.srcport" show="443" size="2" pos="34"/>
    <field name="tcp.dstport" show="51000" size="2" pos="36"/>
  </proto>
</packet>
"#;

#[test]
fn pdml_chunk_to_tree() {
    let tree = decode_pdml_packet(PDML_PACKET).expect("decode").expect("packet");
    assert_eq!(tree.protocols(), "frame:eth:ip:tcp");
    let tcp = tree.find("tcp").expect("tcp");
    assert_eq!(tcp.fields["tcp.dstport"].byte_offset, Some(36));
    assert_eq!(tcp.fields["tcp.dstport"].byte_length, Some(2));

    let input = format!("<pdml>\n<packet>\n<proto name=\"x\" <<\n</packet>\n{}</pdml>\n", PDML_PACKET);
    let mut parser = PdmlParser::new(Cursor::new(input));
    assert!(matches!(parser.next_node(), Err(StreamError::Malformed(_))));
    let tree = parser.next_node().expect("next").expect("packet");
    let record = libwirecrab_dissect::PacketRecord::new(tree);
    assert_eq!(record.meta.number, 7);
    assert_eq!(record.meta.protocol, "tcp");
    assert_eq!(record.meta.src_port, Some(443));
    assert_eq!(record.meta.length, 54);
    assert!(parser.next_node().expect("end").is_none());
}

#[test]
fn fields_lines() {
    let input = "1|TCP|10.0.0.1|10.0.0.2|60|a\n2|TCP|10.0.0.1\n3|DNS|10.0.0.3|10.0.0.4|80|Standard query 0x1a2b A example.com\n";
    let mut parser = FieldsParser::new(Cursor::new(input));
    let first = libwirecrab_dissect::PacketRecord::new(parser.next_node().expect("ok").expect("node"));
    assert_eq!(first.meta.protocol, "tcp");
    assert_eq!(first.meta.src_ip, "10.0.0.1");
    assert_eq!(first.meta.dst_ip, "10.0.0.2");
    assert_eq!(first.meta.length, 60);
    assert!(matches!(
        parser.next_node(),
        Err(StreamError::MissingFields { expected: 6, found: 3 })
    ));
    let third = libwirecrab_dissect::PacketRecord::new(parser.next_node().expect("ok").expect("node"));
    assert_eq!(third.meta.number, 3);
    assert_eq!(third.meta.info, "Standard query 0x1a2b A example.com");
    assert!(parser.next_node().expect("end").is_none());
}
