//! Sources of raw frames, read by this process

use std::io;
use std::path::Path;

use libwirecrab_tools::{Duration, Linktype, RawFrame, RecordingReader};
use pnet_datalink::{self as datalink, Channel, DataLinkReceiver, NetworkInterface};
use tracing::{debug, info};

use crate::error::CaptureError;
use crate::settings::CaptureSettings;

/// Outcome of one read on a frame source
#[derive(Debug)]
pub enum FrameEvent {
    Frame(RawFrame),
    /// Nothing was received before the read timeout
    Timeout,
    /// The source is exhausted
    End,
}

/// A blocking source of raw frames
///
/// Reads must return periodically (`FrameEvent::Timeout`) so that cancellation is noticed.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<FrameEvent, CaptureError>;
}

/// Find the host interface named `name`
pub fn find_interface(name: &str) -> Result<NetworkInterface, CaptureError> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))
}

/// Frames read from a host interface
pub struct NativeSource {
    rx: Box<dyn DataLinkReceiver>,
    snaplen: usize,
}

impl NativeSource {
    pub fn open(device: &str, settings: &CaptureSettings) -> Result<NativeSource, CaptureError> {
        let interface = find_interface(device)?;
        let config = datalink::Config {
            read_timeout: Some(settings.timeout),
            promiscuous: settings.promisc,
            ..datalink::Config::default()
        };
        let rx = match datalink::channel(&interface, config) {
            Ok(Channel::Ethernet(_tx, rx)) => rx,
            Ok(_) => {
                return Err(CaptureError::Source(format!(
                    "unsupported channel type on {}",
                    device
                )))
            }
            Err(e) => return Err(channel_error(device, e)),
        };
        info!(
            "capturing on {} (snaplen={}, promisc={})",
            interface.name, settings.snaplen, settings.promisc
        );
        Ok(NativeSource {
            rx,
            snaplen: settings.snaplen,
        })
    }
}

fn channel_error(device: &str, e: io::Error) -> CaptureError {
    let msg = e.to_string();
    if e.kind() == io::ErrorKind::PermissionDenied
        || msg.contains("permission")
        || msg.contains("Operation not permitted")
    {
        CaptureError::PermissionDenied {
            device: device.to_string(),
            reason: msg,
        }
    } else {
        CaptureError::Io(e)
    }
}

impl FrameSource for NativeSource {
    fn next_frame(&mut self) -> Result<FrameEvent, CaptureError> {
        match self.rx.next() {
            Ok(data) => Ok(FrameEvent::Frame(RawFrame::new(
                0,
                Duration::now(),
                Linktype::ETHERNET,
                data,
                self.snaplen,
            ))),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(FrameEvent::Timeout)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(FrameEvent::Timeout),
            Err(e) => Err(CaptureError::Io(e)),
        }
    }
}

/// Frames read from a capture file (pcap or pcapng, possibly gzipped)
pub struct ReplaySource {
    reader: RecordingReader,
    snaplen: usize,
}

impl ReplaySource {
    pub fn open(path: &str, settings: &CaptureSettings) -> Result<ReplaySource, CaptureError> {
        if !Path::new(path).is_file() {
            return Err(CaptureError::DeviceNotFound(path.to_string()));
        }
        let reader = RecordingReader::open(path)?;
        debug!("replaying {}", path);
        Ok(ReplaySource {
            reader,
            snaplen: settings.snaplen,
        })
    }
}

impl FrameSource for ReplaySource {
    fn next_frame(&mut self) -> Result<FrameEvent, CaptureError> {
        match self.reader.next_frame()? {
            Some(mut frame) => {
                if frame.data.len() > self.snaplen {
                    frame.data.truncate(self.snaplen);
                    frame.caplen = self.snaplen as u32;
                }
                Ok(FrameEvent::Frame(frame))
            }
            None => Ok(FrameEvent::End),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_interface() {
        assert!(matches!(
            find_interface("nonexistent0"),
            Err(CaptureError::DeviceNotFound(name)) if name == "nonexistent0"
        ));
    }

    #[test]
    fn replay_missing_file() {
        let settings = CaptureSettings::default();
        assert!(matches!(
            ReplaySource::open("/nonexistent/capture.pcap", &settings),
            Err(CaptureError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn permission_errors() {
        let e = io::Error::new(io::ErrorKind::Other, "Operation not permitted");
        assert!(matches!(channel_error("eth0", e), CaptureError::PermissionDenied { .. }));
        let e = io::Error::new(io::ErrorKind::Other, "no buffer space");
        assert!(matches!(channel_error("eth0", e), CaptureError::Io(_)));
    }
}
