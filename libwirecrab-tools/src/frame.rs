use crate::duration::Duration;
use pcap_parser::Linktype;

/// A captured frame, owning its data
///
/// `number` is the 1-based position of the frame in its capture.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub number: u64,
    pub ts: Duration,
    pub link_type: Linktype,
    pub caplen: u32,
    pub origlen: u32,
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Build a frame from captured bytes, truncating the data to `snaplen`
    pub fn new(number: u64, ts: Duration, link_type: Linktype, data: &[u8], snaplen: usize) -> Self {
        let caplen = data.len().min(snaplen);
        RawFrame {
            number,
            ts,
            link_type,
            caplen: caplen as u32,
            origlen: data.len() as u32,
            data: data[..caplen].to_vec(),
        }
    }
}
