//! Command-line interface for the `hivereg` binary.
//!
//! Mirrors the shape of `reg.exe`:
//!
//! ```text
//! hivereg --store <hive> add <key> [/v name] [/t type] [/s separator] [/d data]
//! hivereg --store <hive> delete <key> [/v name]
//! hivereg --store <hive> query <key> [/v name]
//! ```
//!
//! Windows-style switches are rewritten to long options before clap sees
//! them, so `/v Name` and `--v Name` are equivalent.

use crate::regtype::RegType;
use crate::store::{KeyListing, RegistryStore};
use crate::tree::RawValue;
use crate::value::ValueData;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Separator used for `REG_MULTI_SZ` data when `/s` is not given.
pub const DEFAULT_SEPARATOR: &str = "\0";

/// Switches accepted in `/name` form.
const SLASH_SWITCHES: &[&str] = &["v", "t", "s", "d", "json", "store", "create", "debug"];

/// hivereg - edit keys and values of Windows registry hive files
#[derive(Parser, Debug)]
#[command(name = "hivereg")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Hive file to operate on
    #[arg(long, global = true, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// Print the result as a JSON object on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Create the hive file if it does not exist
    #[arg(long, global = true)]
    pub create: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a key, or a value under it when /v is given
    Add(AddArgs),

    /// Delete a key with everything below it, or a single value when /v is given
    Delete(DeleteArgs),

    /// Show the subkeys and values of a key, or a single value when /v is given
    Query(QueryArgs),
}

/// Arguments of `add`.
#[derive(Args, Debug)]
pub struct AddArgs {
    /// Key path, separated by '\' or '/'
    pub key: String,

    /// Value name
    #[arg(long = "v", value_name = "NAME")]
    pub value: Option<String>,

    /// Value type, e.g. REG_SZ, REG_DWORD. Omitting it stores REG_SZ like
    /// reg.exe does, rather than rejecting the missing type
    #[arg(long = "t", value_name = "TYPE", default_value = "REG_SZ")]
    pub reg_type: RegType,

    /// Item separator for REG_MULTI_SZ data
    #[arg(long = "s", value_name = "SEPARATOR", allow_hyphen_values = true)]
    pub separator: Option<String>,

    /// Value data
    #[arg(long = "d", value_name = "DATA", default_value = "", allow_hyphen_values = true)]
    pub data: String,
}

/// Arguments of `delete`.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Key path, separated by '\' or '/'
    pub key: String,

    /// Value name
    #[arg(long = "v", value_name = "NAME")]
    pub value: Option<String>,
}

/// Arguments of `query`.
#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Key path, separated by '\' or '/'; empty for the root
    #[arg(default_value = "")]
    pub key: String,

    /// Value name
    #[arg(long = "v", value_name = "NAME")]
    pub value: Option<String>,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Add(_) => "add",
            Command::Delete(_) => "delete",
            Command::Query(_) => "query",
        }
    }

    fn writable(&self) -> bool {
        !matches!(self, Command::Query(_))
    }
}

/// Rewrites `/switch` arguments into `--switch`.
///
/// Only the known switches are rewritten (case-insensitively), so key paths
/// such as `/Software/Vendor` pass through untouched. The first argument is
/// the program name and is left alone.
pub fn rewrite_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .enumerate()
        .map(|(i, arg)| if i == 0 { arg } else { rewrite_switch(arg) })
        .collect()
}

fn rewrite_switch(arg: String) -> String {
    let Some(rest) = arg.strip_prefix('/') else {
        return arg;
    };
    let (name, tail) = match rest.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (rest, None),
    };

    let lower = name.to_ascii_lowercase();
    if !SLASH_SWITCHES.contains(&lower.as_str()) {
        return arg;
    }
    match tail {
        Some(value) => format!("--{}={}", lower, value),
        None => format!("--{}", lower),
    }
}

/// Result of a successful command, as printed.
#[derive(Serialize, Debug)]
struct Report {
    ok: bool,
    command: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<KeyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<ValueReport>,
}

#[derive(Serialize, Debug)]
struct KeyReport {
    path: String,
    subkeys: Vec<String>,
    values: Vec<ValueReport>,
}

#[derive(Serialize, Debug)]
struct ValueReport {
    name: String,
    #[serde(rename = "type")]
    reg_type: String,
    data: String,
    raw: String,
}

#[derive(Serialize, Debug)]
struct Failure {
    ok: bool,
    command: &'static str,
    error: String,
}

impl From<&RawValue> for ValueReport {
    fn from(value: &RawValue) -> Self {
        let data = match ValueData::parse(&value.data, value.data_type) {
            Ok(decoded) => decoded.to_string(),
            Err(_) => hex::encode(&value.data),
        };
        Self {
            name: value.name.clone(),
            reg_type: RegType::describe_tag(value.data_type),
            data,
            raw: hex::encode(&value.data),
        }
    }
}

impl From<KeyListing> for KeyReport {
    fn from(listing: KeyListing) -> Self {
        Self {
            path: listing.path,
            subkeys: listing.subkeys,
            values: listing.values.iter().map(ValueReport::from).collect(),
        }
    }
}

impl Report {
    fn done(command: &'static str) -> Self {
        Self {
            ok: true,
            command,
            key: None,
            value: None,
        }
    }

    fn print_text(&self) {
        if let Some(value) = &self.value {
            print_value(value);
            return;
        }
        match &self.key {
            Some(key) => {
                println!("{}", if key.path.is_empty() { "\\" } else { &key.path });
                for value in &key.values {
                    print_value(value);
                }
                for subkey in &key.subkeys {
                    if key.path.is_empty() {
                        println!("{}", subkey);
                    } else {
                        println!("{}\\{}", key.path, subkey);
                    }
                }
            }
            None => println!("The operation completed successfully."),
        }
    }
}

fn print_value(value: &ValueReport) {
    let name = if value.name.is_empty() { "(Default)" } else { &value.name };
    println!("    {}    {}    {}", name, value.reg_type, value.data);
}

/// Sets up `tracing` on stderr; `--debug` overrides `RUST_LOG`.
pub fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // A subscriber may already be installed when embedded; keep that one.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Parses the process arguments and runs the command.
///
/// This is the main entry point called from `main.rs`. With `--json` the
/// outcome, success or failure, is printed as a JSON object on stdout.
pub fn run() -> Result<()> {
    let cli = Cli::parse_from(rewrite_args(std::env::args()));
    init_tracing(cli.debug);
    run_with(&cli)
}

/// Runs an already parsed command line.
pub fn run_with(cli: &Cli) -> Result<()> {
    let command = cli.command.name();
    match execute(cli) {
        Ok(report) => {
            if cli.json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                report.print_text();
            }
            Ok(())
        }
        Err(err) => {
            if cli.json {
                let failure = Failure {
                    ok: false,
                    command,
                    error: format!("{:#}", err),
                };
                println!("{}", serde_json::to_string(&failure)?);
            }
            Err(err)
        }
    }
}

fn execute(cli: &Cli) -> Result<Report> {
    let path = cli
        .store
        .as_deref()
        .context("no hive given; pass --store <path>")?;
    let mut store = open_store(path, cli.command.writable(), cli.create)?;

    let outcome = dispatch(&mut store, &cli.command);
    let closed = store
        .close()
        .with_context(|| format!("failed to close {}", path.display()));

    // The command's own error is the more useful one
    let report = outcome?;
    closed?;
    Ok(report)
}

fn open_store(path: &Path, writable: bool, create: bool) -> Result<RegistryStore> {
    if create && !path.exists() {
        debug!(path = %path.display(), "Creating new hive");
        return RegistryStore::create(path).with_context(|| format!("failed to create {}", path.display()));
    }
    RegistryStore::open(path, writable).with_context(|| format!("failed to open {}", path.display()))
}

fn dispatch(store: &mut RegistryStore, command: &Command) -> Result<Report> {
    let name = command.name();
    match command {
        Command::Add(args) => {
            match &args.value {
                Some(value) => {
                    let separator = args.separator.as_deref().unwrap_or(DEFAULT_SEPARATOR);
                    store.add_value(&args.key, value, args.reg_type, separator, &args.data)?;
                }
                None => store.add_key(&args.key)?,
            }
            Ok(Report::done(name))
        }
        Command::Delete(args) => {
            match &args.value {
                Some(value) => store.delete_value(&args.key, value)?,
                None => store.delete_key(&args.key)?,
            }
            Ok(Report::done(name))
        }
        Command::Query(args) => {
            let mut report = Report::done(name);
            match &args.value {
                Some(value) => {
                    let raw = store.get_value(&args.key, value)?.ok_or_else(|| {
                        crate::RegistryError::ValueNotFound {
                            path: args.key.clone(),
                            name: value.clone(),
                        }
                    })?;
                    report.value = Some(ValueReport::from(&raw));
                }
                None => report.key = Some(store.query_key(&args.key)?.into()),
            }
            Ok(report)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rewrite_known_switches() {
        let rewritten = rewrite_args(args(&["hivereg", "add", "/Software/App", "/v", "Name", "/T", "REG_DWORD", "/d=1"]));
        assert_eq!(
            rewritten,
            args(&["hivereg", "add", "/Software/App", "--v", "Name", "--t", "REG_DWORD", "--d=1"])
        );
    }

    #[test]
    fn test_program_name_untouched() {
        assert_eq!(rewrite_args(args(&["/json"])), args(&["/json"]));
    }

    #[test]
    fn test_parse_add_value() {
        let cli = Cli::parse_from(rewrite_args(args(&[
            "hivereg", "/store", "h.hiv", "add", "k", "/v", "n", "/t", "dword", "/d", "0x10",
        ])));
        assert_eq!(cli.store.as_deref(), Some(Path::new("h.hiv")));
        match cli.command {
            Command::Add(add) => {
                assert_eq!(add.value.as_deref(), Some("n"));
                assert_eq!(add.reg_type, RegType::Dword);
                assert_eq!(add.data, "0x10");
                assert!(add.separator.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_add_defaults_to_sz() {
        let cli = Cli::parse_from(args(&["hivereg", "add", "k", "--v", "n"]));
        match cli.command {
            Command::Add(add) => assert_eq!(add.reg_type, RegType::Sz),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_type_rejected() {
        assert!(Cli::try_parse_from(args(&["hivereg", "add", "k", "--t", "REG_NOPE"])).is_err());
    }

    #[test]
    fn test_value_report_default_name() {
        let raw = RawValue::new("", RegType::Dword.tag(), vec![16, 0, 0, 0]);
        let report = ValueReport::from(&raw);
        assert_eq!(report.reg_type, "REG_DWORD");
        assert_eq!(report.raw, "10000000");
        assert!(report.data.starts_with("16"));
    }
}
