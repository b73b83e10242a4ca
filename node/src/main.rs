extern crate clap;
extern crate log;
extern crate log4rs;
extern crate nix;

extern crate ripple_judge;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{App, Arg};
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;

use ripple_judge::config::AppConfig;
use ripple_judge::hostrun::HostSandbox;
use ripple_judge::init::AppContextBuilder;
use ripple_judge::{Result, ResultExt};

/// Set by the SIGINT handler; the main loop polls it. Signal handlers can
/// only reach static state, so this flag is the one exception to the
/// no-module-level-state rule.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_signal: nix::libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Initialize log4rs with a console appender at the given level.
fn init_logging(level: LevelFilter) -> Result<()> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}")))
        .build();
    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .chain_err(|| "failed to build the logging configuration")?;
    log4rs::init_config(config).chain_err(|| "failed to initialize logging")?;
    Ok(())
}

/// Install the SIGINT handler driving cooperative shutdown.
fn install_signal_handler() -> Result<()> {
    use nix::sys::signal::{signal, SigHandler, Signal};
    unsafe {
        signal(Signal::SIGINT, SigHandler::Handler(handle_sigint))
            .chain_err(|| "failed to install the SIGINT handler")?;
        signal(Signal::SIGTERM, SigHandler::Handler(handle_sigint))
            .chain_err(|| "failed to install the SIGTERM handler")?;
    }
    Ok(())
}

fn run() -> Result<()> {
    let matches = App::new("ripple-judge")
        .version("0.1.0")
        .about("Submission lifecycle engine of the RippleJudge online judge")
        .arg(Arg::with_name("config")
            .short("c")
            .long("config")
            .value_name("FILE")
            .help("Path to the configuration file")
            .takes_value(true)
            .default_value("config.yaml"))
        .arg(Arg::with_name("verbose")
            .short("v")
            .long("verbose")
            .multiple(true)
            .help("Increase logging verbosity"))
        .get_matches();

    let level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    init_logging(level)?;

    let config_file = matches.value_of("config").expect("config has a default value");
    let config = AppConfig::from_file(config_file)?;

    // The host adapter runs interpreted code without isolation; it stands
    // in for the real sandbox executor on development machines.
    let context = AppContextBuilder::new()
        .with_config(config)
        .with_sandbox(Arc::new(HostSandbox::new()))
        .build()?;

    context.start_maintenance();
    let pool = context.start_workers()?;
    install_signal_handler()?;
    log::info!("judge node is up with {} workers", pool.worker_ids().len());

    while !SHUTDOWN.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutdown signal received");
    let released = pool.shutdown(context.shutdown_grace())
        .chain_err(|| "failed to stop the worker pool")?;
    if released > 0 {
        log::warn!("{} in-flight submissions were released for retry", released);
    }

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {}", e);
        for cause in e.iter().skip(1) {
            eprintln!("caused by: {}", cause);
        }
        std::process::exit(1);
    }
}
