//! # mpc - Music Player Daemon command-line client
//!
//! Searches the MPD database and completes paths for shell tab completion,
//! translating between the terminal's encoding and the daemon's UTF-8.

#[cfg(feature = "cli")]
use std::ffi::{OsStr, OsString};
#[cfg(feature = "cli")]
use std::io::{self, Write};
#[cfg(feature = "cli")]
use std::process::ExitCode;
#[cfg(feature = "cli")]
use std::time::Duration;

#[cfg(feature = "cli")]
use anyhow::{Context, Result};
#[cfg(feature = "cli")]
use clap::{Args, Parser, Subcommand, ValueEnum};
#[cfg(feature = "cli")]
use log::debug;

#[cfg(feature = "cli")]
use mpc_lite::client::{DEFAULT_PORT, MpdClient};
#[cfg(feature = "cli")]
use mpc_lite::{CharsetBridge, InvalidMode, commands};

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features disabled. Enable with --features cli");
    std::process::exit(1);
}

/// mpc: search and browse a Music Player Daemon
#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "mpc")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Server to connect to, optionally as PASSWORD@HOST
    #[arg(long, global = true, env = "MPD_HOST", default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(short, long, global = true, env = "MPD_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Connect and I/O timeout in seconds (0 waits forever)
    #[arg(long, global = true, default_value = "10")]
    timeout: u64,

    /// Terminal encoding, instead of the one reported by the locale
    #[arg(long, global = true)]
    charset: Option<String>,

    /// What to do with text that cannot be translated
    #[arg(long, global = true, value_enum, default_value = "auto")]
    invalid: InvalidArg,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Search for songs whose tags contain the queries
    Search(QueryArgs),

    /// Find songs whose tags match the queries exactly
    Find(QueryArgs),

    /// Complete a song path
    Tab(PrefixArgs),

    /// Complete a directory path
    Lstab(PrefixArgs),

    /// Complete a stored playlist name
    Loadtab(PrefixArgs),

    /// Show the terminal encoding in use
    Charset(CharsetArgs),
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct QueryArgs {
    /// Pairs of search type (artist, album, title, any, ...) and query
    #[arg(required = true, value_name = "TYPE QUERY")]
    terms: Vec<OsString>,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct PrefixArgs {
    /// Path typed so far
    #[arg(default_value = "")]
    prefix: OsString,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct CharsetArgs {
    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[cfg(feature = "cli")]
#[derive(Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[cfg(feature = "cli")]
#[derive(Clone, Copy, Debug, ValueEnum)]
enum InvalidArg {
    /// Skip on an interactive terminal, keep text untranslated otherwise
    Auto,
    /// Drop characters that cannot be translated
    Skip,
    /// Keep text untranslated when any character cannot be translated
    Strict,
}

#[cfg(feature = "cli")]
impl From<InvalidArg> for InvalidMode {
    fn from(arg: InvalidArg) -> Self {
        match arg {
            InvalidArg::Auto => InvalidMode::Auto,
            InvalidArg::Skip => InvalidMode::Skip,
            InvalidArg::Strict => InvalidMode::Strict,
        }
    }
}

#[cfg(feature = "cli")]
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "cli")]
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

#[cfg(feature = "cli")]
fn run(cli: &Cli) -> Result<()> {
    let mode = InvalidMode::from(cli.invalid);
    let mut bridge = match &cli.charset {
        Some(charset) => CharsetBridge::with_charset(charset.as_str(), mode.resolve()),
        None => CharsetBridge::init(mode),
    };

    if let Commands::Charset(args) = &cli.command {
        return charset_command(args, &bridge);
    }

    let mut conn = connect(cli)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match &cli.command {
        Commands::Search(args) => {
            commands::search(&mut conn, &mut bridge, &os_args(&args.terms), &mut out)?
        }
        Commands::Find(args) => {
            commands::find(&mut conn, &mut bridge, &os_args(&args.terms), &mut out)?
        }
        Commands::Tab(args) => {
            commands::tab(&mut conn, &mut bridge, &os_bytes(&args.prefix), &mut out)?
        }
        Commands::Lstab(args) => {
            commands::lstab(&mut conn, &mut bridge, &os_bytes(&args.prefix), &mut out)?
        }
        Commands::Loadtab(args) => {
            commands::loadtab(&mut conn, &mut bridge, &os_bytes(&args.prefix), &mut out)?
        }
        Commands::Charset(_) => unreachable!("handled before connecting"),
    }

    out.flush().context("Failed to write to stdout")?;
    Ok(())
}

#[cfg(feature = "cli")]
fn connect(cli: &Cli) -> Result<MpdClient<std::net::TcpStream>> {
    let (password, host) = split_host(&cli.host);
    let timeout = (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout));

    debug!("connecting to {}:{}", host, cli.port);
    let mut conn = MpdClient::connect(host, cli.port, timeout)
        .with_context(|| format!("Failed to connect to {}:{}", host, cli.port))?;

    if let Some(password) = password {
        conn.password(password.as_bytes())
            .context("Failed to authenticate")?;
    }

    Ok(conn)
}

/// Split `PASSWORD@HOST` into its parts
#[cfg(feature = "cli")]
fn split_host(host: &str) -> (Option<&str>, &str) {
    match host.rsplit_once('@') {
        Some((password, host)) if !host.is_empty() => (Some(password), host),
        _ => (None, host),
    }
}

#[cfg(feature = "cli")]
fn os_args(args: &[OsString]) -> Vec<Vec<u8>> {
    args.iter().map(|arg| os_bytes(arg)).collect()
}

/// Raw bytes of a command-line argument, in the terminal's encoding
#[cfg(feature = "cli")]
fn os_bytes(arg: &OsStr) -> Vec<u8> {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        arg.as_bytes().to_vec()
    }

    #[cfg(not(unix))]
    {
        arg.to_string_lossy().into_owned().into_bytes()
    }
}

#[cfg(feature = "cli")]
fn charset_command(args: &CharsetArgs, bridge: &CharsetBridge) -> Result<()> {
    let info = bridge.info();

    match args.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        OutputFormat::Text => {
            println!("Charset: {}", info.charset);
            println!("Encoding: {}", info.encoding.unwrap_or("unsupported"));
            println!(
                "Invalid characters: {}",
                if info.skip_invalid { "skip" } else { "strict" }
            );
            println!(
                "ASCII Compatible: {}",
                if info.ascii_compatible { "Yes" } else { "No" }
            );
        }
    }

    Ok(())
}
