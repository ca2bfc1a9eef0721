use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::{path::PathBuf, time::Duration};

#[derive(Subcommand, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CliCommands {
    /// Poll the meter and serve the SunSpec registers over Modbus TCP.
    /// This is the default when no command is given.
    #[default]
    #[clap(verbatim_doc_comment)]
    Serve,

    /// Fetch the meter once and print the snapshot, the derived quantities
    /// and the encoded meter registers.
    #[clap(verbatim_doc_comment)]
    Probe,

    /// Print the register map (address, point, encoding, quantity).
    Map,
}

const fn about_text() -> &'static str {
    "Shelly to Fronius bridge - Serve Shelly Pro 3EM readings as a SunSpec smart meter via Modbus TCP."
}

#[derive(Parser, Debug)]
#[command(name="shelly-fronius", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for debug, -vv for trace, -q for warnings only.
    /// Without any flag the log_level from the config file applies.
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Path of the YAML configuration file.
    /// A default file is written there if it does not exist.
    #[arg(global = true, short, long, default_value = "config.yml", verbatim_doc_comment)]
    pub config: PathBuf,

    /// Override the poll interval of the config file.
    /// Examples: "500ms", "2s".
    #[arg(global = true, long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub interval: Option<Duration>,

    #[command(subcommand)]
    pub command: Option<CliCommands>,
}
