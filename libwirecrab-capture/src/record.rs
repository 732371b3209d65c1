//! Recording artifact: the temporary capture file of a session

use std::fs::File;
use std::path::Path;

use libwirecrab_tools::{RawFrame, RecordingWriter};
use tempfile::TempPath;
use tracing::{debug, warn};

use crate::error::CaptureError;

/// Create an empty temporary file to hold the frames of a session
///
/// The file is removed when the returned path is closed or dropped.
pub fn create_recording() -> Result<TempPath, CaptureError> {
    let path = tempfile::Builder::new()
        .prefix("wirecrab-")
        .suffix(".pcap")
        .tempfile()?
        .into_temp_path();
    debug!("recording to {}", path.display());
    Ok(path)
}

/// Remove a recording artifact. Errors are logged only.
pub fn remove_recording(path: TempPath) {
    let shown = path.display().to_string();
    match path.close() {
        Ok(()) => debug!("removed recording {}", shown),
        Err(e) => warn!("could not remove recording {}: {}", shown, e),
    }
}

/// Appends captured frames to a recording artifact
///
/// The file header is written with the link type of the first frame.
pub struct Recorder {
    path: Option<std::path::PathBuf>,
    snaplen: usize,
    writer: Option<RecordingWriter<File>>,
}

impl Recorder {
    pub fn new(path: &Path, snaplen: usize) -> Self {
        Recorder {
            path: Some(path.to_path_buf()),
            snaplen,
            writer: None,
        }
    }

    /// Append a frame. After the first failure, the recording is abandoned.
    pub fn record(&mut self, frame: &RawFrame) {
        if self.writer.is_none() {
            let path = match self.path.take() {
                Some(p) => p,
                None => return,
            };
            match self.open(&path, frame) {
                Ok(w) => self.writer = Some(w),
                Err(e) => {
                    warn!("could not create recording {}: {}", path.display(), e);
                    return;
                }
            }
        }
        if let Some(w) = self.writer.as_mut() {
            if let Err(e) = w.write_frame(frame) {
                warn!("recording stopped at frame {}: {}", frame.number, e);
                self.writer = None;
            }
        }
    }

    fn open(&self, path: &Path, frame: &RawFrame) -> Result<RecordingWriter<File>, CaptureError> {
        let file = File::create(path)?;
        let mut writer = RecordingWriter::new(file);
        writer.init_file(self.snaplen, frame.link_type)?;
        Ok(writer)
    }
}
