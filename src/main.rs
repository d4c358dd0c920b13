use backtrace::Backtrace;
use clap::{Arg, Command};
use db_perf::backfill::{Backfill, BackfillMode};
use db_perf::client::ClientRegistry;
use db_perf::{Config, Driver};
use ringlog::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Builder;
use tokio::time::sleep;

static RUNNING: AtomicBool = AtomicBool::new(true);

fn main() {
    // custom panic hook to terminate whole process after unwinding
    std::panic::set_hook(Box::new(|s| {
        eprintln!("{s}");
        eprintln!("{:?}", Backtrace::new());
        std::process::exit(101);
    }));

    // parse command line options
    let matches = Command::new(env!("CARGO_BIN_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_about(
            "A benchmarking and load generation tool for data stores, with \
            pluggable clients and steerable read/write rates.",
        )
        .arg(
            Arg::new("CONFIG")
                .help("Benchmark configuration file")
                .action(clap::ArgAction::Set)
                .index(1),
        )
        .subcommand(
            Command::new("backfill")
                .about("Fill a slice of the keyspace and exit")
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .help("write, write-if-missing, or verify")
                        .action(clap::ArgAction::Set)
                        .default_value("write"),
                ),
        )
        .get_matches();

    // load config from file
    let config = if let Some(file) = matches.get_one::<String>("CONFIG") {
        match Config::new(file) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error loading config file: {file}\n{e}");
                std::process::exit(1);
            }
        }
    } else {
        eprintln!("configuration file not provided");
        std::process::exit(1);
    };

    // configure debug log
    let debug_output: Box<dyn Output> = if let Some(file) = config.debug().log_file() {
        let backup = config
            .debug()
            .log_backup()
            .unwrap_or(format!("{}.old", file));
        Box::new(
            File::new(&file, &backup, config.debug().log_max_size())
                .expect("failed to open debug log file"),
        )
    } else {
        // by default, log to stderr
        Box::new(Stderr::new())
    };

    let level = config.debug().log_level();

    let debug_log = if level <= Level::Info {
        LogBuilder::new().format(ringlog::default_format)
    } else {
        LogBuilder::new()
    }
    .output(debug_output)
    .log_queue_depth(config.debug().log_queue_depth())
    .single_message_size(config.debug().log_single_message_size())
    .build()
    .expect("failed to initialize debug log");

    let mut log = MultiLogBuilder::new()
        .level_filter(config.debug().log_level().to_level_filter())
        .default(debug_log)
        .build()
        .start();

    // initialize async runtime for the control plane
    let control_runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .build()
        .expect("failed to initialize tokio runtime");

    // spawn logging thread
    control_runtime.spawn(async move {
        while RUNNING.load(Ordering::Relaxed) {
            sleep(Duration::from_millis(1)).await;
            let _ = log.flush();
        }
        let _ = log.flush();
    });

    // stop cleanly on ctrl-c
    control_runtime.spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            RUNNING.store(false, Ordering::Relaxed);
        }
    });

    info!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("client: {}", config.general().client());

    let registry = ClientRegistry::with_defaults();
    let client = match registry.build(&config) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("failed to construct client: {e}");
            std::process::exit(1);
        }
    };

    let driver = match Driver::new(config.clone()) {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("failed to construct driver: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = driver.init(client.clone()) {
        eprintln!("failed to initialize driver: {e}");
        std::process::exit(1);
    }

    // switch into backfill mode if the subcommand is provided
    if let Some(backfill_matches) = matches.subcommand_matches("backfill") {
        let mode = match backfill_matches
            .get_one::<String>("mode")
            .map(String::as_str)
        {
            Some("write") | None => BackfillMode::Write,
            Some("write-if-missing") => BackfillMode::WriteIfMissing,
            Some("verify") => BackfillMode::Verify,
            Some(other) => {
                eprintln!("unknown backfill mode: {other}");
                std::process::exit(1);
            }
        };

        info!("starting backfill");
        let backfill = Backfill::new(config.clone());
        if let Err(e) = backfill.run(client, mode) {
            eprintln!("backfill failed: {e}");
            std::process::exit(1);
        }
        backfill.shutdown();
        let _ = driver.shutdown_client();
        RUNNING.store(false, Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(100));
        return;
    }

    // otherwise continue onwards with the benchmark workload

    if let Err(e) = driver.start() {
        eprintln!("failed to start workloads: {e}");
        std::process::exit(1);
    }

    debug!("waiting for the run to complete");
    let begin = Instant::now();
    while RUNNING.load(Ordering::Relaxed) {
        if let Some(duration) = config.general().duration() {
            if begin.elapsed() >= duration {
                info!("configured duration reached, stopping");
                break;
            }
        }
        if !driver.reads_running() && !driver.writes_running() {
            info!("all workloads stopped, exiting");
            break;
        }
        std::thread::sleep(Duration::from_secs(1));
    }

    driver.stop();
    if let Err(e) = driver.shutdown_client() {
        warn!("client shutdown failed: {e}");
    }
    RUNNING.store(false, Ordering::Relaxed);

    // delay before exiting so the final log lines flush
    std::thread::sleep(Duration::from_millis(100));
}
