//! External decoder process

use std::ffi::{OsStr, OsString};
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::CaptureError;

/// Fields printed in the flat-fields mode, in column order
pub const FIELDS_COLUMNS: &[&str] = &[
    "frame.number",
    "_ws.col.Protocol",
    "_ws.col.Source",
    "_ws.col.Destination",
    "frame.len",
    "_ws.col.Info",
];

/// A running external decoder, with its stderr drained on a helper thread
pub struct TsharkProcess {
    program: String,
    child: Child,
    stderr_thread: Option<JoinHandle<()>>,
}

impl TsharkProcess {
    /// Launch `program` with `args`, and return the process with its standard output
    pub fn spawn(program: &str, args: &[OsString]) -> Result<(TsharkProcess, ChildStdout), CaptureError> {
        debug!("launching {} {:?}", program, args);
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CaptureError::Launch {
                program: program.to_string(),
                source,
            })?;
        let stdout = match child.stdout.take() {
            Some(s) => s,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::Source(format!("no standard output for {}", program)));
            }
        };
        let stderr_thread = child.stderr.take().and_then(|stderr| {
            thread::Builder::new()
                .name("wirecrab-stderr".to_string())
                .spawn(move || {
                    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                        debug!(target: "tshark", "{}", line);
                    }
                })
                .map_err(|e| warn!("could not drain decoder stderr: {}", e))
                .ok()
        });
        let process = TsharkProcess {
            program: program.to_string(),
            child,
            stderr_thread,
        };
        Ok((process, stdout))
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Terminate the process and release its resources
    ///
    /// Killing the process closes its standard output, which unblocks a reader.
    pub fn kill(mut self) {
        match self.child.kill() {
            Ok(()) => (),
            // already exited
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => (),
            Err(e) => warn!("could not kill {} (pid {}): {}", self.program, self.child.id(), e),
        }
        match self.child.wait() {
            Ok(status) => debug!("{} exited with {}", self.program, status),
            Err(e) => warn!("could not wait for {}: {}", self.program, e),
        }
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
    }
}

fn live_args(device: &str, recording: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-i", device, "-l", "-n", "-F", "pcap", "-w"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(recording.as_os_str().to_owned());
    args.push("-P".into());
    args
}

/// Arguments for a live capture printing PDML, recording frames to `recording`
pub fn live_pdml_args(device: &str, recording: &Path) -> Vec<OsString> {
    let mut args = live_args(device, recording);
    args.extend(["-T", "pdml"].iter().map(OsString::from));
    args
}

/// Arguments for a live capture printing one `|`-separated line per packet
pub fn live_fields_args(device: &str, recording: &Path) -> Vec<OsString> {
    let mut args = live_args(device, recording);
    args.extend(["-T", "fields", "-E", "separator=|"].iter().map(OsString::from));
    for field in FIELDS_COLUMNS {
        args.push("-e".into());
        args.push(OsStr::new(field).to_owned());
    }
    args
}

/// Arguments to print the PDML of one frame of a recording
pub fn details_args(recording: &Path, number: u64) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-r".into(), recording.as_os_str().to_owned(), "-n".into()];
    args.push("-Y".into());
    args.push(format!("frame.number=={}", number).into());
    args.extend(["-T", "pdml"].iter().map(OsString::from));
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_arguments() {
        let rec = Path::new("/tmp/rec.pcap");
        let args = live_fields_args("eth0", rec);
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(&args[..9], &["-i", "eth0", "-l", "-n", "-F", "pcap", "-w", "/tmp/rec.pcap", "-P"]);
        assert!(args.contains(&"separator=|".to_string()));
        assert_eq!(args.iter().filter(|a| *a == "-e").count(), FIELDS_COLUMNS.len());
        assert_eq!(args.last().map(String::as_str), Some("_ws.col.Info"));

        let args = details_args(rec, 42);
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-r", "/tmp/rec.pcap", "-n", "-Y", "frame.number==42", "-T", "pdml"]);
    }

    #[test]
    fn launch_failure() {
        match TsharkProcess::spawn("/nonexistent/wirecrab-decoder", &[]) {
            Err(CaptureError::Launch { program, .. }) => {
                assert_eq!(program, "/nonexistent/wirecrab-decoder")
            }
            _ => panic!("expected a launch error"),
        }
    }
}
