//! Capture recording: frames written to, and read back from, a pcap file
//!
//! The writer produces legacy pcap (one file header, then one record per frame).
//! The reader accepts pcap and pcap-ng, optionally gzip-compressed.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{Block, LegacyPcapBlock, Linktype, PcapBlockOwned, PcapError, ToVec};

use crate::duration::{Duration, MICROS_PER_SEC};
use crate::error::Error;
use crate::frame::RawFrame;

/// Initial size of the reader buffer: a full 65535 bytes record plus headers
const READER_BUFFER_CAPACITY: usize = 16384 * 8;
/// The reader buffer grows up to this size for oversized records
const READER_BUFFER_MAX_SIZE: usize = 65536 * 8;

/// Writer for the legacy pcap format
pub struct RecordingWriter<W>
where
    W: Write,
{
    w: W,
}

impl<W: Write> RecordingWriter<W> {
    pub fn new(w: W) -> Self {
        RecordingWriter { w }
    }

    /// Write the pcap file header
    pub fn init_file(&mut self, snaplen: usize, linktype: Linktype) -> Result<(), Error> {
        let mut hdr = pcap_parser::PcapHeader::new();
        hdr.snaplen = snaplen as u32;
        hdr.network = linktype;
        let s = hdr
            .to_vec()
            .map_err(|e| Error::Pcap(format!("header serialization failed: {e:?}")))?;
        self.w.write_all(&s)?;
        Ok(())
    }

    /// Append one record. Each record is written with a single call, so that a reader
    /// never observes a partial record once this function returned.
    pub fn write_frame(&mut self, frame: &RawFrame) -> Result<(), Error> {
        let record = LegacyPcapBlock {
            ts_sec: frame.ts.secs,
            ts_usec: frame.ts.micros,
            caplen: frame.data.len() as u32,
            origlen: frame.origlen.max(frame.data.len() as u32),
            data: &frame.data,
        };
        let s = record
            .to_vec_raw()
            .map_err(|e| Error::Pcap(format!("record serialization failed: {e:?}")))?;
        self.w.write_all(&s)?;
        self.w.flush()?;
        Ok(())
    }
}

/// Sequential reader over the frames of a pcap or pcap-ng recording
pub struct RecordingReader {
    reader: Box<dyn PcapReaderIterator + Send>,
    link_types: Vec<Linktype>,
    index: u64,
    last_incomplete_index: Option<u64>,
    buffer_size: usize,
}

impl RecordingReader {
    /// Open a recording file. Files ending with `.gz` are decompressed on the fly.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path)?;
        if path.extension().map_or(false, |ext| ext == "gz") {
            RecordingReader::from_reader(GzDecoder::new(file))
        } else {
            RecordingReader::from_reader(file)
        }
    }

    pub fn from_reader<R: Read + Send + 'static>(r: R) -> Result<Self, Error> {
        let reader = pcap_parser::create_reader(READER_BUFFER_CAPACITY, r)
            .map_err(|e| Error::Pcap(format!("could not read recording header: {e:?}")))?;
        Ok(RecordingReader {
            reader,
            link_types: Vec::new(),
            index: 0,
            last_incomplete_index: None,
            buffer_size: READER_BUFFER_CAPACITY,
        })
    }

    /// Read the next frame, or `None` at the end of the recording.
    ///
    /// A truncated last record (for ex. a file still being written) is treated as the
    /// end of the recording.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>, Error> {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let frame = match block {
                        PcapBlockOwned::LegacyHeader(ref hdr) => {
                            trace!("legacy pcap, link type: {}", hdr.network);
                            self.link_types = vec![hdr.network];
                            None
                        }
                        PcapBlockOwned::Legacy(ref b) => {
                            let link_type = self.link_types.first().copied().unwrap_or(Linktype::ETHERNET);
                            let caplen = (b.caplen as usize).min(b.data.len());
                            Some(RawFrame {
                                number: self.index + 1,
                                ts: Duration::new(b.ts_sec, b.ts_usec),
                                link_type,
                                caplen: caplen as u32,
                                origlen: b.origlen,
                                data: b.data[..caplen].to_vec(),
                            })
                        }
                        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                            debug!("pcap-ng: new section");
                            self.link_types.clear();
                            None
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(ref idb)) => {
                            self.link_types.push(idb.linktype);
                            None
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(ref epb)) => {
                            let link_type = self
                                .link_types
                                .get(epb.if_id as usize)
                                .copied()
                                .unwrap_or(Linktype::ETHERNET);
                            // default pcap-ng resolution (microseconds)
                            let ts = (u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low);
                            let secs = ts / u64::from(MICROS_PER_SEC);
                            let micros = ts % u64::from(MICROS_PER_SEC);
                            let caplen = (epb.caplen as usize).min(epb.data.len());
                            Some(RawFrame {
                                number: self.index + 1,
                                ts: Duration::new(secs as u32, micros as u32),
                                link_type,
                                caplen: caplen as u32,
                                origlen: epb.origlen,
                                data: epb.data[..caplen].to_vec(),
                            })
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(ref spb)) => {
                            let link_type = self.link_types.first().copied().unwrap_or(Linktype::ETHERNET);
                            let caplen = (spb.origlen as usize).min(spb.data.len());
                            Some(RawFrame {
                                number: self.index + 1,
                                ts: Duration::default(),
                                link_type,
                                caplen: caplen as u32,
                                origlen: spb.origlen,
                                data: spb.data[..caplen].to_vec(),
                            })
                        }
                        _ => {
                            // XXX just ignore block
                            None
                        }
                    };
                    self.reader.consume(offset);
                    if let Some(frame) = frame {
                        self.index += 1;
                        return Ok(Some(frame));
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    if self.last_incomplete_index == Some(self.index) {
                        debug!("could not read complete data block, recording truncated after frame {}", self.index);
                        return Ok(None);
                    }
                    self.last_incomplete_index = Some(self.index);
                    self.reader
                        .refill()
                        .map_err(|e| Error::Pcap(format!("refill failed: {e:?}")))?;
                }
                Err(PcapError::UnexpectedEof) => {
                    debug!("recording ends with a partial block after frame {}", self.index);
                    return Ok(None);
                }
                Err(PcapError::BufferTooSmall) => {
                    let size = self.buffer_size * 2;
                    if size > READER_BUFFER_MAX_SIZE || !self.reader.grow(size) {
                        return Err(Error::Pcap(format!(
                            "block after frame {} does not fit in {} bytes",
                            self.index, self.buffer_size
                        )));
                    }
                    trace!("reader buffer grown to {size} bytes");
                    self.buffer_size = size;
                    self.reader
                        .refill()
                        .map_err(|e| Error::Pcap(format!("refill failed: {e:?}")))?;
                }
                Err(e) => return Err(Error::Pcap(format!("error while reading: {e:?}"))),
            }
        }
    }
}

/// Look up a frame by its 1-based number
pub fn find_frame<P: AsRef<Path>>(path: P, number: u64) -> Result<Option<RawFrame>, Error> {
    if number == 0 {
        return Ok(None);
    }
    let mut reader = RecordingReader::open(path)?;
    while let Some(frame) = reader.next_frame()? {
        if frame.number == number {
            return Ok(Some(frame));
        }
    }
    Ok(None)
}
