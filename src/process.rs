use crate::app::sink::LogSink;
use crate::configuration::constants::processes::WAIT_STEP;
use crate::error::ProcessError;
use std::cmp::min;
use std::collections::{BTreeMap, VecDeque};
use std::env;
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lines of combined output kept for the error of a failed command.
const OUTPUT_TAIL: usize = 50;

/// A fully described child process: what to run, with which extra
/// environment, from where, and for how long at most.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub workdir: Option<PathBuf>,
    /// The child is killed once this has passed; `None` waits forever.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Seam between stages and the host's process table.
pub trait Execute: Send + Sync {
    /// Runs to completion, copying stdout and stderr line by line into the
    /// sink. A non-zero exit is an error carrying the tail of the output, and
    /// outliving the invocation's timeout is [`ProcessError::TimedOut`].
    fn stream(&self, invocation: &Invocation, sink: &LogSink) -> Result<(), ProcessError>;

    /// Runs to completion and collects the output, whatever the exit status.
    fn capture(&self, invocation: &Invocation) -> Result<Captured, ProcessError>;
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(key, value)| (key.into(), value.into())));
        self
    }

    pub fn workdir(mut self, dir: Option<PathBuf>) -> Self {
        self.workdir = dir;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds an invocation from a `[program, args...]` list.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).envs(&self.env).stdin(Stdio::null());
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }
        command
    }

    fn spawn_error(&self, source: std::io::Error) -> ProcessError {
        ProcessError::Spawn {
            program: self.program.clone(),
            source,
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

impl Captured {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turns a non-zero exit into [`ProcessError::Exit`].
    pub fn check(self, invocation: &Invocation) -> Result<Self, ProcessError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProcessError::Exit {
                command: invocation.to_string(),
                code: self.code,
                output: format!("{}{}", self.stdout, self.stderr),
            })
        }
    }
}

/// Runs invocations as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShell;

impl SystemShell {
    fn spawn(invocation: &Invocation) -> Result<Child, ProcessError> {
        debug!("Executing `{}`", invocation);
        invocation
            .command()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| invocation.spawn_error(err))
    }

    /// Waits for the child, killing it once the invocation's timeout passes.
    fn wait(child: &mut Child, invocation: &Invocation) -> Result<ExitStatus, ProcessError> {
        let timeout = match invocation.timeout {
            Some(timeout) => timeout,
            None => return child.wait().map_err(|err| invocation.spawn_error(err)),
        };
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child.try_wait().map_err(|err| invocation.spawn_error(err))? {
                return Ok(status);
            }
            let now = Instant::now();
            if now >= deadline {
                warn!("`{}` is still running after {:?}, killing it", invocation, timeout);
                if let Err(err) = child.kill() {
                    debug!("Cannot kill `{}`: {}", invocation, err);
                }
                if let Err(err) = child.wait() {
                    debug!("Cannot reap `{}`: {}", invocation, err);
                }
                return Err(ProcessError::TimedOut {
                    command: invocation.to_string(),
                    timeout,
                });
            }
            thread::sleep(min(WAIT_STEP, deadline - now));
        }
    }
}

impl Execute for SystemShell {
    fn stream(&self, invocation: &Invocation, sink: &LogSink) -> Result<(), ProcessError> {
        let mut child = Self::spawn(invocation)?;
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(OUTPUT_TAIL)));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(copy_lines(stdout, sink.clone(), tail.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(copy_lines(stderr, sink.clone(), tail.clone()));
        }
        // On a timeout the readers are left behind: a grandchild may still hold the pipes.
        let status = Self::wait(&mut child, invocation)?;
        for reader in readers {
            if reader.join().is_err() {
                debug!("Output reader of `{}` panicked", invocation);
            }
        }
        if status.success() {
            return Ok(());
        }
        let output = lock!(tail).iter().cloned().collect::<Vec<_>>().join("\n");
        Err(ProcessError::Exit {
            command: invocation.to_string(),
            code: status.code(),
            output,
        })
    }

    fn capture(&self, invocation: &Invocation) -> Result<Captured, ProcessError> {
        let mut child = Self::spawn(invocation)?;
        let stdout = child.stdout.take().map(read_all);
        let stderr = child.stderr.take().map(read_all);
        let status = Self::wait(&mut child, invocation)?;
        Ok(Captured {
            code: status.code(),
            stdout: joined(stdout),
            stderr: joined(stderr),
        })
    }
}

fn read_all(mut stream: impl Read + Send + 'static) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Err(err) = stream.read_to_end(&mut bytes) {
            debug!("Stopped reading child output: {}", err);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

fn joined(reader: Option<JoinHandle<String>>) -> String {
    reader.and_then(|reader| reader.join().ok()).unwrap_or_default()
}

fn copy_lines(
    stream: impl Read + Send + 'static,
    sink: LogSink,
    tail: Arc<Mutex<VecDeque<String>>>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(&['\r', '\n'][..]);
                    sink.line(format_args!("{}", line));
                    let mut tail = lock!(tail);
                    if tail.len() == OUTPUT_TAIL {
                        tail.pop_front();
                    }
                    tail.push_back(line.to_owned());
                }
                Err(err) => {
                    debug!("Stopped reading child output: {}", err);
                    break;
                }
            }
        }
    })
}

/// Resolves a program the way the OS would, without running it.
pub fn locate(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return Some(candidate.to_path_buf()).filter(|path| path.is_file());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .flat_map(|dir| {
            let plain = dir.join(program);
            let exe = dir.join(format!("{}{}", program, env::consts::EXE_SUFFIX));
            vec![plain, exe]
        })
        .find(|path| path.is_file())
}
