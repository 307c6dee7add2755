use derivative::*;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

enum Target {
    Buffer(Vec<u8>),
    File(File),
}

/// Where one Test's stage output goes. Clones share the same target.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct LogSink {
    #[derivative(Debug = "ignore")]
    target: Arc<Mutex<Target>>,
}

impl LogSink {
    pub fn buffered() -> Self {
        Self {
            target: Arc::new(Mutex::new(Target::Buffer(Vec::new()))),
        }
    }

    pub fn file(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            target: Arc::new(Mutex::new(Target::File(file))),
        })
    }

    /// Buffered output so far; `None` for file-backed sinks.
    pub fn contents(&self) -> Option<String> {
        match &*lock!(self.target) {
            Target::Buffer(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Target::File(_) => None,
        }
    }

    /// Writes one line. A sink that cannot be written to never fails a stage.
    pub fn line(&self, args: fmt::Arguments) {
        let mut target = lock!(self.target);
        let result = match &mut *target {
            Target::Buffer(bytes) => writeln!(bytes, "{}", args),
            Target::File(file) => writeln!(file, "{}", args),
        };
        if let Err(err) = result {
            debug!("Dropped log sink output: {}", err);
        }
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut *lock!(self.target) {
            Target::Buffer(bytes) => bytes.write(buf),
            Target::File(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut *lock!(self.target) {
            Target::Buffer(_) => Ok(()),
            Target::File(file) => file.flush(),
        }
    }
}
