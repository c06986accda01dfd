//! Child process execution with output capture and timeout.

use crate::error::ExecError;
use indexmap::IndexMap;
use log::debug;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

/// Captured result of one invocation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Exit code. A process killed by a signal reports the negated signal number.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock seconds around the whole invocation.
    pub duration: f64,
}

/// Run `argv[0]` with the remaining elements as arguments.
///
/// `env` is layered over the inherited environment. Output is decoded lossily.
/// On timeout the child is killed and reaped before returning.
pub fn run(
    argv: &[String],
    env: &IndexMap<String, String>,
    workdir: Option<&Path>,
    timeout: Option<u64>,
) -> Result<ExecutionResult, ExecError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(ExecError::NotFound(String::new()));
    };

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.envs(env);
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    // A missing directory fails spawn with NotFound too; name it instead.
    if let Some(dir) = workdir
        && !dir.is_dir()
    {
        return Err(ExecError::Workdir(dir.to_path_buf()));
    }

    let start = Instant::now();
    let deadline = timeout.map(|secs| start + Duration::from_secs(secs));
    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ExecError::NotFound(program.clone()),
        _ => ExecError::Io {
            program: program.clone(),
            source: e,
        },
    })?;
    debug!("spawned {program} (pid {})", child.id());

    // Drain both pipes concurrently so a chatty child cannot block on a full pipe.
    let capture = Capture::drain(&mut child);

    let status = match wait(&mut child, deadline) {
        Ok(Some(status)) => status,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            // Readers are left to finish on their own: a grandchild may
            // still hold the pipes open.
            return Err(ExecError::Timeout(timeout.unwrap_or_default()));
        }
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExecError::Io {
                program: program.clone(),
                source: e,
            });
        }
    };

    // The same deadline covers the pipes, which a backgrounded grandchild
    // can keep open after the child exits.
    let Some((stdout, stderr)) = capture.collect(deadline) else {
        debug!("{program} exited but its output stayed open past the deadline");
        return Err(ExecError::Timeout(timeout.unwrap_or_default()));
    };
    let duration = start.elapsed().as_secs_f64();

    Ok(ExecutionResult {
        exit_code: exit_code(status),
        stdout,
        stderr,
        duration,
    })
}

/// Poll until the child exits. `Ok(None)` means the deadline passed.
fn wait(child: &mut Child, deadline: Option<Instant>) -> io::Result<Option<ExitStatus>> {
    let Some(deadline) = deadline else {
        return child.wait().map(Some);
    };

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

#[derive(Clone, Copy)]
enum Pipe {
    Stdout,
    Stderr,
}

/// Reader threads for the child's pipes, reporting back over a channel.
struct Capture {
    rx: Receiver<(Pipe, Vec<u8>)>,
    pending: usize,
}

impl Capture {
    fn drain(child: &mut Child) -> Self {
        let (tx, rx) = mpsc::channel();
        let mut pending = 0;
        if let Some(pipe) = child.stdout.take() {
            spawn_reader(pipe, Pipe::Stdout, tx.clone());
            pending += 1;
        }
        if let Some(pipe) = child.stderr.take() {
            spawn_reader(pipe, Pipe::Stderr, tx);
            pending += 1;
        }
        Self { rx, pending }
    }

    /// Decoded stdout and stderr, or `None` if the deadline passed first.
    fn collect(self, deadline: Option<Instant>) -> Option<(String, String)> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        for _ in 0..self.pending {
            let received = match deadline {
                Some(deadline) => {
                    match self.rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                        Ok(item) => Some(item),
                        Err(RecvTimeoutError::Timeout) => return None,
                        Err(RecvTimeoutError::Disconnected) => None,
                    }
                }
                None => self.rx.recv().ok(),
            };
            // A reader that died without sending leaves its stream empty.
            let Some((pipe, bytes)) = received else {
                break;
            };
            match pipe {
                Pipe::Stdout => stdout = bytes,
                Pipe::Stderr => stderr = bytes,
            }
        }
        Some((
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
        ))
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R, which: Pipe, tx: Sender<(Pipe, Vec<u8>)>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send((which, buf));
    });
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
