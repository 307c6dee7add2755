use crate::configuration::constants::cargo_env::CARGO_PKG_NAME;
use crate::configuration::settings::{Overrides, ReadyCheckMode};
use clap::arg_enum;
use log::LevelFilter;
use std::path::PathBuf;
use structopt::StructOpt;

arg_enum! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum LogLevel {
        Off, Error, Warn, Info, Debug, Trace,
    }
}

#[derive(StructOpt, Debug)]
#[structopt(name = CARGO_PKG_NAME)]
pub struct Opt {
    /// Test configuration file, YAML or JSON
    #[structopt(parse(from_os_str))]
    pub file: PathBuf,

    /// Sets a logging level
    #[structopt(case_insensitive = true, long, short = "L", possible_values = &LogLevel::variants(), env = "LOG_LEVEL")]
    pub logging: Option<LogLevel>,

    /// File to which application will write logs
    #[structopt(long, short = "O", env = "LOG_OUTPUT_FILE")]
    pub log_output_file: Option<PathBuf>,

    /// Amount of tests running at the same time
    #[structopt(long, short = "t")]
    pub threads: Option<usize>,

    /// Run only the named tests, any other will be ignored
    #[structopt(long = "test", short = "T")]
    pub tests: Vec<String>,

    /// Start no further tests after the first failure
    #[structopt(long)]
    pub fail_fast: bool,

    /// Poll the ready checks of a test at the same time
    #[structopt(long)]
    pub concurrent_ready_checks: bool,

    /// Directory receiving one stage output file per test
    #[structopt(long, parse(from_os_str))]
    pub log_dir: Option<PathBuf>,

    /// Write the JSON report of the run to this file
    #[structopt(long, short = "o", parse(from_os_str))]
    pub output: Option<PathBuf>,
}

impl Opt {
    /// Flags left off the command line override nothing.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            parallelization: self.threads,
            fail_fast: Some(true).filter(|_| self.fail_fast),
            ready_check_mode: Some(ReadyCheckMode::Concurrent).filter(|_| self.concurrent_ready_checks),
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Opt {
        Opt::from_iter_safe(std::iter::once(CARGO_PKG_NAME).chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_bare_invocation_overrides_nothing() {
        let opt = parse(&["testamint.yml"]);

        assert_eq!(opt.file, PathBuf::from("testamint.yml"));
        assert!(opt.tests.is_empty());
        assert_eq!(opt.overrides(), Overrides::default());
    }

    #[test]
    fn test_flags_become_overrides() {
        let opt = parse(&[
            "testamint.yml",
            "-t",
            "4",
            "--fail-fast",
            "--concurrent-ready-checks",
            "-T",
            "api",
            "--test",
            "smoke",
            "-o",
            "report.json",
        ]);

        assert_eq!(
            opt.overrides(),
            Overrides {
                parallelization: Some(4),
                fail_fast: Some(true),
                ready_check_mode: Some(ReadyCheckMode::Concurrent),
            }
        );
        assert_eq!(opt.tests, vec!["api", "smoke"]);
        assert_eq!(opt.output, Some(PathBuf::from("report.json")));
    }

    #[test]
    fn test_log_level_is_case_insensitive() {
        let opt = parse(&["testamint.yml", "-L", "debug"]);
        assert_eq!(opt.logging, Some(LogLevel::Debug));
        assert_eq!(LevelFilter::from(LogLevel::Debug), LevelFilter::Debug);
    }

    #[test]
    fn test_file_is_required() {
        assert!(Opt::from_iter_safe(vec![CARGO_PKG_NAME]).is_err());
    }
}
