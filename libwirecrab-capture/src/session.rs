use std::ffi::OsString;
use std::fmt;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use libwirecrab_dissect::{DissectionEngine, MatchContext, PacketRecord, ProtocolNode};
use libwirecrab_tools::find_frame;
use serde::Serialize;
use tempfile::TempPath;
use tracing::{debug, error, info, trace, warn};

use crate::error::CaptureError;
use crate::record::{create_recording, remove_recording, Recorder};
use crate::settings::{Backend, CaptureSettings};
use crate::source::{find_interface, FrameEvent, FrameSource, NativeSource, ReplaySource};
use crate::store::PacketStore;
use crate::stream::{decode_hex, FieldsParser, PdmlParser, StreamFrameParser};
use crate::tshark::{live_fields_args, live_pdml_args, TsharkProcess};

/// Lifecycle of the capture of a service
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Field holding undecoded bytes in the output of the external decoder
const DATA_FIELD: &str = "data.data";

/// What the capture thread reads, and how it turns it into records
enum Pipeline {
    Frames {
        source: Box<dyn FrameSource>,
        recorder: Recorder,
        engine: DissectionEngine,
    },
    Stream {
        parser: Box<dyn StreamFrameParser>,
        enricher: Enricher,
    },
}

/// Source of the bytes used to resolve the unknown layers of decoder output
enum Enricher {
    /// bytes shown in the `data.data` field of the tree
    DataField(DissectionEngine),
    /// frame bytes read back from the recording written by the decoder
    Recording {
        engine: DissectionEngine,
        recording: PathBuf,
    },
}

impl Enricher {
    fn apply(&self, tree: &mut ProtocolNode) {
        match self {
            Enricher::DataField(engine) => enrich_with_data(engine, tree),
            Enricher::Recording { engine, recording } => enrich_from_recording(engine, tree, recording),
        }
    }
}

/// One active capture: a source, a background decode thread, a recording artifact
pub struct CaptureSession {
    device: String,
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    process: Option<TsharkProcess>,
    recording: Option<TempPath>,
}

impl CaptureSession {
    /// Open the capture source for `device` and start the decode thread
    ///
    /// Decoded records are pushed to `store`.
    pub fn start(
        device: &str,
        settings: &CaptureSettings,
        engine: &DissectionEngine,
        store: Arc<PacketStore>,
    ) -> Result<CaptureSession, CaptureError> {
        let backend = settings.backend;
        if backend != Backend::Replay {
            find_interface(device)?;
        }
        let recording = create_recording()?;

        let (pipeline, process) = match open_pipeline(device, settings, engine, &recording) {
            Ok(p) => p,
            Err(e) => {
                remove_recording(recording);
                return Err(e);
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread_finished = finished.clone();
        let spawned = thread::Builder::new()
            .name("wirecrab-capture".to_string())
            .spawn(move || {
                match pipeline {
                    Pipeline::Frames {
                        source,
                        recorder,
                        engine,
                    } => run_frames(source, recorder, &engine, &store, &thread_stop),
                    Pipeline::Stream { parser, enricher } => {
                        run_stream(parser, &enricher, &store, &thread_stop)
                    }
                }
                thread_finished.store(true, Ordering::SeqCst);
            });
        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                if let Some(p) = process {
                    p.kill();
                }
                remove_recording(recording);
                return Err(CaptureError::Io(e));
            }
        };

        info!("capture started on {} (backend {})", device, backend);
        Ok(CaptureSession {
            device: device.to_string(),
            stop,
            finished,
            handle: Some(handle),
            process,
            recording: Some(recording),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Path of the recording artifact
    pub fn recording(&self) -> Option<&Path> {
        self.recording.as_deref()
    }

    /// Return true once the decode thread has exited (end of source, or fatal error)
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Stop the capture, wait for the decode thread and remove the recording
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(process) = self.process.take() {
            debug!("stopping decoder process {}", process.id());
            process.kill();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("capture thread on {} panicked", self.device);
            }
        }
        if let Some(recording) = self.recording.take() {
            remove_recording(recording);
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn open_pipeline(
    device: &str,
    settings: &CaptureSettings,
    engine: &DissectionEngine,
    recording: &Path,
) -> Result<(Pipeline, Option<TsharkProcess>), CaptureError> {
    let stream = |args: Vec<OsString>,
                  enricher: Enricher|
     -> Result<(Pipeline, Option<TsharkProcess>), CaptureError> {
        let (process, stdout) = TsharkProcess::spawn(&settings.tshark_path, &args)?;
        let reader = BufReader::new(stdout);
        let parser: Box<dyn StreamFrameParser> = match settings.backend {
            Backend::Fields => Box::new(FieldsParser::new(reader)),
            _ => Box::new(PdmlParser::new(reader)),
        };
        Ok((Pipeline::Stream { parser, enricher }, Some(process)))
    };
    match settings.backend {
        Backend::Native | Backend::Replay => {
            let source: Box<dyn FrameSource> = if settings.backend == Backend::Native {
                Box::new(NativeSource::open(device, settings)?)
            } else {
                Box::new(ReplaySource::open(device, settings)?)
            };
            let pipeline = Pipeline::Frames {
                source,
                recorder: Recorder::new(recording, settings.snaplen),
                engine: engine.clone(),
            };
            Ok((pipeline, None))
        }
        Backend::Pdml => stream(
            live_pdml_args(device, recording),
            Enricher::DataField(engine.clone()),
        ),
        Backend::Fields => stream(
            live_fields_args(device, recording),
            Enricher::Recording {
                engine: engine.clone(),
                recording: recording.to_path_buf(),
            },
        ),
    }
}

fn run_frames(
    mut source: Box<dyn FrameSource>,
    mut recorder: Recorder,
    engine: &DissectionEngine,
    store: &PacketStore,
    stop: &AtomicBool,
) {
    let mut number = 0u64;
    while !stop.load(Ordering::SeqCst) {
        match source.next_frame() {
            Ok(FrameEvent::Frame(mut frame)) => {
                number += 1;
                frame.number = number;
                recorder.record(&frame);
                let tree = engine.frame_tree(&frame);
                if tree.child.is_none() {
                    trace!("frame {}: nothing decoded", number);
                }
                store.push(PacketRecord::new(tree));
            }
            Ok(FrameEvent::Timeout) => (),
            Ok(FrameEvent::End) => {
                info!("end of capture source after {} frames", number);
                break;
            }
            Err(e) => {
                error!("capture source error: {}", e);
                break;
            }
        }
    }
    debug!("frame loop exited ({} frames)", number);
}

fn run_stream(
    mut parser: Box<dyn StreamFrameParser>,
    enricher: &Enricher,
    store: &PacketStore,
    stop: &AtomicBool,
) {
    let mut number = 0u64;
    while !stop.load(Ordering::SeqCst) {
        match parser.next_node() {
            Ok(Some(mut tree)) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                number += 1;
                enricher.apply(&mut tree);
                let mut record = PacketRecord::new(tree);
                if record.meta.number == 0 {
                    record.meta.number = number;
                }
                store.push(record);
            }
            Ok(None) => {
                info!("end of decoder output after {} packets", number);
                break;
            }
            Err(e) if e.is_recoverable() => warn!("skipping record: {}", e),
            Err(e) => {
                error!("decoder output error: {}", e);
                break;
            }
        }
    }
    debug!("stream loop exited ({} packets)", number);
}

/// Resolve the undecoded layers of a tree using the bytes shown in its `data.data` field
pub fn enrich_with_data(engine: &DissectionEngine, tree: &mut ProtocolNode) {
    let data = tree
        .iter()
        .find_map(|n| n.get(DATA_FIELD))
        .and_then(decode_hex);
    if let Some(data) = data {
        engine.enrich(tree, &data, &MatchContext::default());
    }
}

/// Resolve the undecoded layers of a tree using the frame bytes kept in the recording
///
/// An unresolved node takes the name and fields of the innermost layer decoded from the
/// recorded frame below the protocol of its parent. Trees of frames not yet written to
/// the recording are left unchanged.
pub fn enrich_from_recording(engine: &DissectionEngine, tree: &mut ProtocolNode, recording: &Path) {
    if !tree.iter().any(ProtocolNode::is_unresolved) {
        return;
    }
    let number = match tree.get("frame.number").and_then(|n| n.parse::<u64>().ok()) {
        Some(n) => n,
        None => return,
    };
    let frame = match find_frame(recording, number) {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            trace!("frame {} not in recording yet", number);
            return;
        }
        Err(e) => {
            debug!("could not read frame {} from recording: {}", number, e);
            return;
        }
    };
    let decoded = engine.frame_tree(&frame);

    let mut parent: Option<String> = None;
    let mut current = Some(tree);
    while let Some(n) = current {
        if n.is_unresolved() {
            if let Some(layer) = parent.as_deref().and_then(|p| decoded_below(&decoded, p)) {
                debug!("frame {}: '{}' resolved as {}", number, n.name, layer.name);
                n.name = layer.name.clone();
                n.fields = layer.fields.clone();
            }
        }
        parent = Some(n.name.clone());
        current = n.child.as_deref_mut();
    }
}

fn decoded_below<'a>(decoded: &'a ProtocolNode, parent: &str) -> Option<&'a ProtocolNode> {
    decoded.find(parent)?.child.as_deref().map(ProtocolNode::leaf)
}
