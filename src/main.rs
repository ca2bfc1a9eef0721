//! Shelly to Fronius bridge
//!
//! Polls a Shelly Pro 3EM energy meter over HTTP and serves its readings as a
//! SunSpec smart meter (common model plus model 213 or 203) over Modbus TCP,
//! so a Fronius inverter can use the Shelly as its grid meter.
//!
//! On first start without a configuration file a default `config.yml` is
//! written and the program exits, edit it and start again.

use anyhow::{bail, Context, Result};
use clap::Parser;
use flexi_logger::{Duplicate, FileSpec, Logger, LoggerHandle};
use log::*;
use shelly_fronius_lib::{
    poller::{Poller, TelemetrySource},
    register_map::{RegisterMap, METER_DATA_OFFSET},
    register_store::RegisterStore,
    server,
    telemetry::{self, TelemetrySnapshot},
};
use std::{panic, path::Path, str::FromStr, sync::Arc};

mod commandline;
mod config;

fn logging_init(loglevel: LevelFilter, log_file: Option<&Path>) -> Result<LoggerHandle> {
    let logger = Logger::try_with_env_or_str(loglevel.as_str()).context("Cannot init logging")?;
    let logger = match log_file {
        Some(path) => logger
            .log_to_file(
                FileSpec::try_from(path)
                    .with_context(|| format!("Invalid log file {path:?}"))?,
            )
            .append()
            .duplicate_to_stderr(Duplicate::All),
        None => logger,
    };
    let log_handle = logger.start().context("Cannot start logging")?;

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    Ok(log_handle)
}

fn log_snapshot(snapshot: &TelemetrySnapshot) {
    info!("Meter reachable:");
    for (name, phase) in ["A", "B", "C"].iter().zip(snapshot.phases()) {
        info!(
            "  Phase {name}: {:.1}W {:.1}V {:.2}A PF={:.2} {:.2}Hz",
            phase.act_power, phase.voltage, phase.current, phase.pf, phase.freq
        );
    }
    info!(
        "  Total: {:.1}W {:.1}VA ({})",
        snapshot.total_act_power,
        snapshot.total_aprt_power,
        snapshot.direction()
    );
    info!(
        "  Energy: imported {:.0}Wh, exported {:.0}Wh, net {:.0}Wh",
        snapshot.total_act_energy,
        snapshot.total_act_ret_energy,
        snapshot.total_act_energy - snapshot.total_act_ret_energy
    );
}

fn print_map(map: &RegisterMap, base: u16) {
    println!(
        "SunSpec model {} (length {}) at {base}, meter data at {}",
        map.model_id(),
        map.model_length(),
        base.wrapping_add(METER_DATA_OFFSET)
    );
    println!("{:>7}  {:<10} {:<8} {:>3}  Quantity", "Address", "Point", "Encoding", "SF");
    for field in map.fields() {
        println!(
            "{:>7}  {:<10} {:<8} {:>3}  {}",
            base.wrapping_add(map.field_offset(field)),
            field.point,
            field.encoding.to_string(),
            field.scale_factor,
            field.quantity
        );
    }
    for constant in map.constants() {
        println!(
            "{:>7}  {:<10} {:<8} {:>3}  (static)",
            base.wrapping_add(METER_DATA_OFFSET + constant.offset),
            constant.point,
            "int16",
            constant.value
        );
    }
    println!("{:>7}  End", base.wrapping_add(map.end_offset()));
}

async fn probe(config: &config::Config) -> Result<()> {
    let map = config.meter.register_map()?;
    let base = config.modbus.sunspec_base;
    let mut client = config.shelly.client()?;
    let snapshot = client
        .fetch()
        .await
        .with_context(|| format!("Cannot read meter at {}", config.shelly.url))?;
    let derived = telemetry::derive(&snapshot);

    println!("Snapshot: {snapshot:#?}");
    println!("Derived: {derived:#?}");
    println!("{}", telemetry::StatusSummary::new(&snapshot, &derived));
    for update in map.encode(base, &derived)? {
        println!("{:>7}: {:04X?}", update.address, update.values);
    }
    Ok(())
}

async fn serve(config: config::Config) -> Result<()> {
    let map = config.meter.register_map()?;
    let base = config.modbus.sunspec_base;
    info!(
        "Emulating {} {} (SunSpec model {}) at base address {base}",
        config.identity.manufacturer,
        config.identity.model,
        map.model_id()
    );
    for field in map.fields().iter().filter(|field| field.quantity.is_energy()) {
        debug!("Energy point {} encoded as {}", field.point, field.encoding);
    }

    let store = Arc::new(RegisterStore::new(base, map.required_len()));
    store.apply(&map.header_image(base, &config.identity)?);

    let client = config.shelly.client()?;
    let mut poller = Poller::new(client, store.clone(), map)
        .with_interval(config.poll.interval)
        .with_fetch_timeout(config.shelly.timeout)
        .with_alert_threshold(config.poll.alert_threshold);

    info!("Probing meter at {}", config.shelly.url);
    let snapshot = match poller.fetch().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            error!("Cannot reach the meter at {}: {err}", config.shelly.url);
            bail!("Startup probe failed");
        }
    };
    log_snapshot(&snapshot);
    info!("{}", poller.apply(&snapshot)?);

    let poll_task = tokio::spawn(poller.run());
    let listen_addr = config.modbus.listen_addr();
    tokio::select! {
        result = server::serve(listen_addr, store) => {
            result.with_context(|| format!("Modbus server on {listen_addr} failed"))?;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Cannot listen for Ctrl-C")?;
            info!("Shutting down");
        }
    }
    poll_task.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    let loaded = config::load_or_create(&args.config)?;
    let loglevel = match (&loaded, args.verbose.is_present()) {
        (Some(config), false) => LevelFilter::from_str(&config.log_level)?,
        _ => args.verbose.log_level_filter(),
    };
    let log_file = loaded.as_ref().and_then(|config| config.log_file.as_deref());
    let _log_handle = logging_init(loglevel, log_file)?;

    let Some(mut config) = loaded else {
        info!(
            "Wrote default configuration to {:?}, edit it and start again",
            args.config
        );
        return Ok(());
    };
    debug!("Loaded config file {:?}", args.config);
    if let Some(interval) = args.interval.filter(|interval| !interval.is_zero()) {
        config.poll.interval = interval;
    }
    info!(
        "shelly-fronius {} started. Log level: {loglevel}",
        env!("CARGO_PKG_VERSION")
    );

    match args.command.unwrap_or_default() {
        commandline::CliCommands::Serve => serve(config).await,
        commandline::CliCommands::Probe => probe(&config).await,
        commandline::CliCommands::Map => {
            print_map(&config.meter.register_map()?, config.modbus.sunspec_base);
            Ok(())
        }
    }
}
