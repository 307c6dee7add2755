//! Test doubles shared by the unit tests.

use crate::app::sink::LogSink;
use crate::error::ProcessError;
use crate::process::{Captured, Execute, Invocation};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub enum Response {
    Output(String),
    Exit(i32, String),
    /// Fails as if the invocation outlived its timeout.
    TimedOut,
    Panic(String),
}

/// Records every invocation instead of running it. Invocations whose command
/// line contains a registered pattern get that response; everything else
/// succeeds with no output.
#[derive(Debug, Default)]
pub struct RecordingShell {
    rules: Vec<(String, Response)>,
    calls: Mutex<Vec<Invocation>>,
}

impl RecordingShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, pattern: &str, response: Response) -> Self {
        self.rules.push((pattern.to_owned(), response));
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.invocations().iter().map(ToString::to_string).collect()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|call| call.contains(pattern)).count()
    }

    fn record(&self, invocation: &Invocation) -> Response {
        self.calls.lock().unwrap().push(invocation.clone());
        let line = invocation.to_string();
        self.rules
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| Response::Output(String::new()))
    }
}

impl Execute for RecordingShell {
    fn stream(&self, invocation: &Invocation, sink: &LogSink) -> Result<(), ProcessError> {
        let captured = self.capture(invocation)?;
        for line in captured.stdout.lines() {
            sink.line(format_args!("{}", line));
        }
        captured.check(invocation).map(|_| ())
    }

    fn capture(&self, invocation: &Invocation) -> Result<Captured, ProcessError> {
        match self.record(invocation) {
            Response::Output(stdout) => Ok(Captured {
                code: Some(0),
                stdout,
                stderr: String::new(),
            }),
            Response::Exit(code, stdout) => Ok(Captured {
                code: Some(code),
                stdout,
                stderr: String::new(),
            }),
            Response::TimedOut => Err(ProcessError::TimedOut {
                command: invocation.to_string(),
                timeout: invocation.timeout.unwrap_or_default(),
            }),
            Response::Panic(message) => panic!("{}", message),
        }
    }
}

/// A minimal HTTP server answering every request with the status chosen by
/// `respond(hit, since_start)`. `hit` starts at 1.
pub struct StubServer {
    pub port: u16,
    hits: Arc<AtomicU32>,
}

impl StubServer {
    pub fn start<F>(respond: F) -> Self
    where
        F: Fn(u32, Duration) -> u16 + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let started = Instant::now();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let mut stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => continue,
                };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                while reader.read_line(&mut line).map(|read| read > 0).unwrap_or(false) {
                    if line == "\r\n" {
                        break;
                    }
                    line.clear();
                }
                let hit = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let status = respond(hit, started.elapsed());
                let _ = write!(
                    stream,
                    "HTTP/1.1 {} Stub\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status
                );
            }
        });
        Self { port, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }
}
