//! End to end runs against the in-process memory client.

use db_perf::backfill::{Backfill, BackfillMode};
use db_perf::client::ClientRegistry;
use db_perf::{Config, Driver};
use std::time::Duration;

fn config(toml: &str) -> Config {
    let config: Config = toml::from_str(toml).unwrap();
    config.validate().unwrap();
    config
}

#[test]
fn write_workload_makes_progress_and_stops_on_command() {
    let config = config(
        "[general]\n\
         client = \"memory\"\n\
         initial_seed = 7\n\
         [workload]\n\
         num_keys = 100\n\
         num_writers = 2\n\
         read_enabled = false\n\
         write_rate_limit = 500.0\n",
    );

    let client = ClientRegistry::with_defaults().build(&config).unwrap();
    let driver = Driver::new(config).unwrap();
    driver.init(client).unwrap();

    driver.start_writes().unwrap();
    assert!(driver.writes_running());

    // let the workers push some traffic through
    std::thread::sleep(Duration::from_millis(500));
    let written = driver.monitor().write_success();
    assert!(written > 0, "no writes observed after 500ms");

    driver.stop_writes();
    assert!(!driver.writes_running());

    // a stopped direction produces no further operations
    let after_stop = driver.monitor().write_success();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(driver.monitor().write_success(), after_stop);

    driver.stop();
    assert_eq!(driver.monitor().write_success(), 0);
    driver.shutdown_client().unwrap();
}

#[test]
fn reads_hit_what_the_backfill_wrote() {
    let config = config(
        "[general]\n\
         client = \"memory\"\n\
         initial_seed = 11\n\
         [workload]\n\
         num_keys = 50\n\
         num_readers = 2\n\
         write_enabled = false\n\
         read_rate_limit = 500.0\n\
         [backfill]\n\
         threads = 2\n\
         key_slots = 1\n",
    );

    let client = ClientRegistry::with_defaults().build(&config).unwrap();
    let driver = Driver::new(config.clone()).unwrap();
    driver.init(client.clone()).unwrap();

    // the whole keyspace is one slot, so every key gets a value
    let backfill = Backfill::new(config);
    backfill.run(client, BackfillMode::Write).unwrap();
    assert_eq!(backfill.written(), 50);
    backfill.shutdown();

    driver.start_reads().unwrap();
    std::thread::sleep(Duration::from_millis(500));
    driver.stop_reads();

    let monitor = driver.monitor();
    assert!(monitor.read_success() > 0, "no reads observed after 500ms");
    assert_eq!(monitor.read_failure(), 0);
    assert_eq!(monitor.cache_miss(), 0);
    assert!(monitor.cache_hit() > 0);

    driver.stop();
    driver.shutdown_client().unwrap();
}

#[test]
fn rate_changes_apply_while_a_run_is_in_flight() {
    let config = config(
        "[general]\n\
         client = \"memory\"\n\
         [workload]\n\
         num_keys = 100\n\
         num_writers = 1\n\
         read_enabled = false\n\
         write_rate_limit = 100.0\n",
    );

    let client = ClientRegistry::with_defaults().build(&config).unwrap();
    let driver = Driver::new(config).unwrap();
    driver.init(client).unwrap();

    driver.start_writes().unwrap();
    assert_eq!(driver.write_rate(), Some(100.0));
    driver.set_write_rate(250.0).unwrap();
    assert_eq!(driver.write_rate(), Some(250.0));

    std::thread::sleep(Duration::from_millis(200));
    assert!(driver.writes_running());

    driver.stop();
    driver.shutdown_client().unwrap();
}
