use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use libwirecrab_tools::Config;

use crate::error::CaptureError;

pub const DEFAULT_SNAPLEN: usize = 65535;
pub const DEFAULT_TIMEOUT_MS: usize = 1000;
pub const DEFAULT_STORE_CAPACITY: usize = 1_000_000;
pub const DEFAULT_TSHARK_PATH: &str = "tshark";

/// Where frames come from, and how they are decoded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Backend {
    /// Host interface, decoded by the built-in dissectors
    #[default]
    Native,
    /// Capture file, decoded by the built-in dissectors
    Replay,
    /// External decoder printing PDML
    Pdml,
    /// External decoder printing one line of fields per packet
    Fields,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Native => "native",
            Backend::Replay => "replay",
            Backend::Pdml => "pdml",
            Backend::Fields => "fields",
        }
    }

    /// Return true if frames are read by this process (not by an external decoder)
    pub fn is_frame_source(self) -> bool {
        matches!(self, Backend::Native | Backend::Replay)
    }
}

impl FromStr for Backend {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(Backend::Native),
            "replay" => Ok(Backend::Replay),
            "pdml" => Ok(Backend::Pdml),
            "fields" => Ok(Backend::Fields),
            _ => Err(CaptureError::Config(format!("unknown capture backend '{}'", s))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoder used for packet details
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DetailsDecoder {
    #[default]
    Native,
    Tshark,
}

impl FromStr for DetailsDecoder {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(DetailsDecoder::Native),
            "tshark" => Ok(DetailsDecoder::Tshark),
            _ => Err(CaptureError::Config(format!("unknown details decoder '{}'", s))),
        }
    }
}

/// Capture parameters, read from the configuration
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub backend: Backend,
    pub snaplen: usize,
    pub promisc: bool,
    pub timeout: Duration,
    pub store_capacity: usize,
    pub clear_on_start: bool,
    pub tshark_path: String,
    pub details_decoder: DetailsDecoder,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        CaptureSettings {
            backend: Backend::default(),
            snaplen: DEFAULT_SNAPLEN,
            promisc: false,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS as u64),
            store_capacity: DEFAULT_STORE_CAPACITY,
            clear_on_start: true,
            tshark_path: DEFAULT_TSHARK_PATH.to_string(),
            details_decoder: DetailsDecoder::default(),
        }
    }
}

impl CaptureSettings {
    pub fn from_config(config: &Config) -> Result<Self, CaptureError> {
        let mut settings = CaptureSettings::default();
        if let Some(backend) = config.get("capture.backend") {
            settings.backend = backend.parse()?;
        }
        if let Some(decoder) = config.get("details.decoder") {
            settings.details_decoder = decoder.parse()?;
        }
        if let Some(snaplen) = config.get_usize("capture.snaplen") {
            if snaplen == 0 {
                return Err(CaptureError::Config("capture.snaplen must be positive".to_string()));
            }
            settings.snaplen = snaplen;
        }
        if let Some(promisc) = config.get_bool("capture.promisc") {
            settings.promisc = promisc;
        }
        if let Some(ms) = config.get_usize("capture.timeout_ms") {
            settings.timeout = Duration::from_millis(ms.max(1) as u64);
        }
        if let Some(capacity) = config.get_usize("store.capacity") {
            settings.store_capacity = capacity.max(1);
        }
        if let Some(clear) = config.get_bool("store.clear_on_start") {
            settings.clear_on_start = clear;
        }
        if let Some(path) = config.get("tshark.path") {
            settings.tshark_path = path.to_string();
        }
        Ok(settings)
    }
}
