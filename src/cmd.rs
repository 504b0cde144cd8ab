#![allow(dead_code)]

use std::ffi::OsStr;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::MountError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long to wait for output pipes after the child exits. Daemonizing
/// programs (`rclone mount --daemon`) may leave a grandchild holding them.
const PIPE_GRACE: Duration = Duration::from_millis(500);

/// Output captured from a subprocess.
#[derive(Debug, Clone, Default)]
pub struct CaptureOutput {
    pub stdout: String,
    pub stderr: String,
    /// The process exit code, or 1 if the process was killed by a signal.
    pub status: i32,
}

impl CaptureOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs external programs. The engines and the unit manager only talk to the
/// OS through this trait so tests can script the outcomes.
pub trait CommandRunner: Send + Sync {
    fn run(&self, prog: &str, args: &[String], timeout: Duration)
    -> Result<CaptureOutput, MountError>;

    /// Like `run`, feeding `input` on stdin. Secrets go this way so they stay
    /// out of argv and the debug log.
    fn run_with_input(
        &self,
        prog: &str,
        args: &[String],
        input: &str,
        timeout: Duration,
    ) -> Result<CaptureOutput, MountError>;
}

/// Spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        prog: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CaptureOutput, MountError> {
        run_capture(prog, args, timeout)
    }

    fn run_with_input(
        &self,
        prog: &str,
        args: &[String],
        input: &str,
        timeout: Duration,
    ) -> Result<CaptureOutput, MountError> {
        run_capture_with_input(prog, args, input, timeout)
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// Run `prog` with `args`, capturing stdout and stderr, killing it after `timeout`.
///
/// Returns `Err` if the process could not be spawned or timed out.
/// A non-zero exit code is NOT an error; it is returned in `CaptureOutput.status`.
pub fn run_capture<S: AsRef<OsStr>>(
    prog: &str,
    args: &[S],
    timeout: Duration,
) -> Result<CaptureOutput, MountError> {
    spawn_capture(prog, args, None, timeout)
}

/// `run_capture` with `input` written to the child's stdin. The input is
/// never logged.
pub fn run_capture_with_input<S: AsRef<OsStr>>(
    prog: &str,
    args: &[S],
    input: &str,
    timeout: Duration,
) -> Result<CaptureOutput, MountError> {
    spawn_capture(prog, args, Some(input.as_bytes()), timeout)
}

fn spawn_capture<S: AsRef<OsStr>>(
    prog: &str,
    args: &[S],
    input: Option<&[u8]>,
    timeout: Duration,
) -> Result<CaptureOutput, MountError> {
    tracing::debug!(command = %display_cmd(prog, args), stdin = input.is_some(), "spawning");
    let stdin = if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    };
    let mut child = Command::new(prog)
        .args(args)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MountError::ProgramMissing {
                    program: prog.to_string(),
                    reason: e.to_string(),
                }
            } else {
                MountError::io(format!("Failed to run {prog}"), e)
            }
        })?;

    if let (Some(data), Some(mut pipe)) = (input, child.stdin.take()) {
        let data = data.to_vec();
        // a writer thread keeps a child that never reads from blocking us
        thread::spawn(move || {
            let _ = pipe.write_all(&data);
        });
    }

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!(program = prog, ?timeout, "killed after timeout");
                return Err(MountError::Timeout {
                    program: prog.to_string(),
                    timeout,
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(MountError::io(format!("Failed to wait for {prog}"), e)),
        }
    };

    let collect = |rx: Option<mpsc::Receiver<String>>| {
        rx.and_then(|rx| rx.recv_timeout(PIPE_GRACE).ok())
            .unwrap_or_default()
    };
    Ok(CaptureOutput {
        stdout: collect(stdout),
        stderr: collect(stderr),
        status: status.code().unwrap_or(1),
    })
}

/// Run through `runner` and turn a non-zero exit into `CommandFailed`.
pub fn run_checked(
    runner: &dyn CommandRunner,
    prog: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CaptureOutput, MountError> {
    let out = runner.run(prog, args, timeout)?;
    check_status(prog, out)
}

/// Turn a non-zero exit in `out` into `CommandFailed`.
pub fn check_status(prog: &str, out: CaptureOutput) -> Result<CaptureOutput, MountError> {
    if !out.success() {
        return Err(MountError::CommandFailed {
            program: prog.to_string(),
            status: out.status,
            stderr: out.stderr.trim().to_string(),
        });
    }
    Ok(out)
}

/// Render a command line for logs and dry-run output.
pub fn display_cmd<S: AsRef<OsStr>>(prog: &str, args: &[S]) -> String {
    let mut parts = vec![prog.to_string()];
    for arg in args {
        let arg = arg.as_ref().to_string_lossy();
        if arg.is_empty() || arg.chars().any(char::is_whitespace) {
            parts.push(format!("'{arg}'"));
        } else {
            parts.push(arg.into_owned());
        }
    }
    parts.join(" ")
}

/// Return true if `prog` resolves on `PATH`.
pub fn which(runner: &dyn CommandRunner, prog: &str) -> bool {
    runner
        .run("which", &[prog.to_string()], Duration::from_secs(5))
        .map(|out| out.success())
        .unwrap_or(false)
}

#[cfg(test)]
pub mod fake {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;

    /// Canned reply for one invocation of a program.
    #[derive(Debug, Clone)]
    pub enum Reply {
        Exit { status: i32, stdout: String, stderr: String },
        Timeout,
        Missing,
    }

    impl Reply {
        pub fn ok(stdout: &str) -> Self {
            Self::Exit {
                status: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            }
        }

        pub fn fail(status: i32, stderr: &str) -> Self {
            Self::Exit {
                status,
                stdout: String::new(),
                stderr: stderr.to_string(),
            }
        }
    }

    /// Records every invocation and replays queued replies per program.
    /// Programs with nothing queued succeed with empty output.
    #[derive(Default)]
    pub struct ScriptedRunner {
        replies: Mutex<HashMap<String, VecDeque<Reply>>>,
        calls: Mutex<Vec<(String, Vec<String>)>>,
        inputs: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(&self, prog: &str, reply: Reply) -> &Self {
            self.replies
                .lock()
                .unwrap()
                .entry(prog.to_string())
                .or_default()
                .push_back(reply);
            self
        }

        pub fn calls(&self) -> Vec<(String, Vec<String>)> {
            self.calls.lock().unwrap().clone()
        }

        /// Stdin handed to each `run_with_input` call of `prog`.
        pub fn inputs_for(&self, prog: &str) -> Vec<String> {
            self.inputs
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| p == prog)
                .map(|(_, input)| input.clone())
                .collect()
        }

        pub fn calls_for(&self, prog: &str) -> Vec<Vec<String>> {
            self.calls()
                .into_iter()
                .filter(|(p, _)| p == prog)
                .map(|(_, args)| args)
                .collect()
        }
    }

    impl ScriptedRunner {
        fn reply(
            &self,
            prog: &str,
            args: &[String],
            timeout: Duration,
        ) -> Result<CaptureOutput, MountError> {
            self.calls
                .lock()
                .unwrap()
                .push((prog.to_string(), args.to_vec()));
            let reply = self
                .replies
                .lock()
                .unwrap()
                .get_mut(prog)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Reply::ok(""));
            match reply {
                Reply::Exit {
                    status,
                    stdout,
                    stderr,
                } => Ok(CaptureOutput {
                    stdout,
                    stderr,
                    status,
                }),
                Reply::Timeout => Err(MountError::Timeout {
                    program: prog.to_string(),
                    timeout,
                }),
                Reply::Missing => Err(MountError::ProgramMissing {
                    program: prog.to_string(),
                    reason: "No such file or directory".to_string(),
                }),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(
            &self,
            prog: &str,
            args: &[String],
            timeout: Duration,
        ) -> Result<CaptureOutput, MountError> {
            self.reply(prog, args, timeout)
        }

        fn run_with_input(
            &self,
            prog: &str,
            args: &[String],
            input: &str,
            timeout: Duration,
        ) -> Result<CaptureOutput, MountError> {
            self.inputs
                .lock()
                .unwrap()
                .push((prog.to_string(), input.to_string()));
            self.reply(prog, args, timeout)
        }
    }
}
