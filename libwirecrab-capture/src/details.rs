use std::path::Path;
use std::process::Command;

use libwirecrab_dissect::{DissectionEngine, MatchContext, ProtocolNode};
use libwirecrab_tools::{find_frame, hex_dump, RawFrame};
use serde::Serialize;
use tracing::debug;

use crate::error::DetailsError;
use crate::settings::DetailsDecoder;
use crate::stream::decode_pdml_packet;
use crate::tshark::details_args;

/// Full decode of one recorded frame
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PacketDetails {
    pub number: u64,
    pub tree: ProtocolNode,
    pub hex_dump: String,
}

/// Decodes frames of a recording artifact on demand
pub struct DetailsLookup<'a> {
    pub engine: &'a DissectionEngine,
    pub decoder: DetailsDecoder,
    pub tshark_path: &'a str,
}

impl<'a> DetailsLookup<'a> {
    /// Locate frame `number` (1-based) in `recording`, and decode it
    pub fn lookup(&self, recording: &Path, number: u64) -> Result<PacketDetails, DetailsError> {
        let frame = read_frame(recording, number)?;
        let hex_dump = hex_dump(&frame.data);
        let tree = match self.decoder {
            DetailsDecoder::Native => self.engine.frame_tree(&frame),
            DetailsDecoder::Tshark => self.tshark_tree(recording, &frame)?,
        };
        Ok(PacketDetails {
            number,
            tree,
            hex_dump,
        })
    }

    fn tshark_tree(&self, recording: &Path, frame: &RawFrame) -> Result<ProtocolNode, DetailsError> {
        let output = Command::new(self.tshark_path)
            .args(details_args(recording, frame.number))
            .output()
            .map_err(|e| DetailsError::Decode(format!("could not run {}: {}", self.tshark_path, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DetailsError::Decode(format!(
                "{} exited with {}: {}",
                self.tshark_path,
                output.status,
                stderr.trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut tree = decode_pdml_packet(&stdout)
            .map_err(|e| DetailsError::Decode(e.to_string()))?
            .ok_or(DetailsError::NotFound(frame.number))?;
        self.engine
            .enrich(&mut tree, &frame.data, &MatchContext::default());
        Ok(tree)
    }
}

fn read_frame(recording: &Path, number: u64) -> Result<RawFrame, DetailsError> {
    if number == 0 {
        return Err(DetailsError::NotFound(number));
    }
    match recording.metadata() {
        Ok(m) if m.len() > 0 => (),
        _ => {
            debug!("recording {} is empty", recording.display());
            return Err(DetailsError::NotFound(number));
        }
    }
    find_frame(recording, number)
        .map_err(|e| DetailsError::Decode(e.to_string()))?
        .ok_or(DetailsError::NotFound(number))
}
