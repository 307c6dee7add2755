#[macro_use]
extern crate log;

/// Locks a mutex, recovering the data of a poisoned one.
macro_rules! lock {
    ($mutex:expr) => {
        match $mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    };
}

mod app;
mod check;
mod configuration;
mod connection;
mod error;
mod process;
mod reporter;
mod runner;
mod setup;
#[cfg(test)]
mod testing;
mod time;

use log::LevelFilter;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::Ordering;
use std::{env, fs, path::Path, path::PathBuf, process::exit, thread};
use structopt::StructOpt;

use self::app::App;
use self::configuration::command_line::{LogLevel, Opt};
use self::configuration::constants::exit as code;
use self::configuration::manifest::TestConfig;
use self::configuration::settings::Overrides;
use self::error::{chain, ConfigError};
use self::process::SystemShell;

fn main() {
    let options = Opt::from_args();

    if let Err(err) = init_logging(
        options.logging.unwrap_or(LogLevel::Info).into(),
        &options.log_output_file,
    ) {
        eprintln!("Failed to initialize logging: {}", err);
        exit(code::CONFIG);
    }

    exit(run(options));
}

fn run(options: Opt) -> i32 {
    let config = match load(&options) {
        Ok(config) => config,
        Err(err) => {
            error!("Failed to load test configuration: {}", chain(&err));
            return code::CONFIG;
        }
    };
    debug!("Initiated configuration {:#?}", config);

    let output = options.output.as_deref().map(absolute);
    let log_dir = options.log_dir.as_deref().map(absolute).filter(|dir| {
        fs::create_dir_all(dir)
            .map_err(|err| warn!("Cannot create log directory {}, logging to memory: {}", dir.display(), err))
            .is_ok()
    });
    if let Err(err) = enter_config_dir(&options.file) {
        error!("{}", chain(&err));
        return code::CONFIG;
    }

    let shell = SystemShell;
    let app = App::new(config, &shell).with_log_dir(log_dir);
    watch_signals(&app);

    let summary = app.run();
    reporter::log_summary(&summary.reports, summary.elapsed);
    if let Some(path) = output {
        match reporter::write_json(&path, &summary.reports, &summary.skipped) {
            Ok(()) => info!("Report written to {}", path.display()),
            Err(err) => error!("Cannot write report {}: {}", path.display(), err),
        }
    }

    if summary.succeeded() {
        code::SUCCESS
    } else {
        code::FAILURE
    }
}

/// File first, then `TESTAMINT_*` variables, then command line flags.
fn load(options: &Opt) -> Result<TestConfig, ConfigError> {
    let mut config = TestConfig::from_file(&options.file)?;
    config.apply(Overrides::from_env()?.merge(options.overrides()));
    config.retain_named(&options.tests)?;
    Ok(config)
}

/// Relative paths inside the configuration resolve against its directory.
fn enter_config_dir(file: &Path) -> Result<(), ConfigError> {
    match file.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        Some(dir) => env::set_current_dir(dir).map_err(|source| ConfigError::WorkingDirectory {
            path: dir.to_path_buf(),
            source,
        }),
        None => Ok(()),
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// First signal stops dispatch and lets running tests tear down; second one exits.
fn watch_signals(app: &App) {
    let mut signals = match Signals::new(&[SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(err) => {
            warn!("Cannot listen for signals, interrupts will skip teardown: {}", err);
            return;
        }
    };
    let halt = app.halt_flag();
    thread::spawn(move || {
        for (received, signal) in signals.forever().enumerate() {
            if received == 0 {
                warn!("Received signal {}, finishing running tests", signal);
                halt.store(true, Ordering::SeqCst);
            } else {
                error!("Received signal {} again, exiting without teardown", signal);
                exit(code::INTERRUPTED);
            }
        }
    });
}

fn init_logging(level: LevelFilter, output: &Option<PathBuf>) -> Result<(), fern::InitError> {
    let mut dispatcher = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}:{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record
                    .line()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "".to_owned()),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(log_file) = output {
        dispatcher = dispatcher.chain(fern::log_file(log_file)?)
    }
    dispatcher.apply()?;
    info!("Logging level {} enabled", level);
    Ok(())
}
