//! Entry point: hand-rolled flag scan (spec §6 — CLI parsing is an outer collaborator, not
//! part of the core), config file load + validation, then start the reactor.

use server_proxy::config::{self, AppConfig, FromYaml};
use server_proxy::error::{CleanError, Result};
use server_proxy::reactor::Server;

struct Cli {
    config_path: String,
    port: Option<u16>,
    log_async: Option<bool>,
    trigger_mode: Option<u8>,
    linger_on_shutdown: Option<bool>,
    db_pool_size: Option<usize>,
    thread_count: Option<usize>,
    log_disabled: Option<bool>,
    concurrency_mode_reactor: Option<bool>,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config_path: "config.yaml".to_string(),
            port: None,
            log_async: None,
            trigger_mode: None,
            linger_on_shutdown: None,
            db_pool_size: None,
            thread_count: None,
            log_disabled: None,
            concurrency_mode_reactor: None,
        }
    }
}

fn parse_flag_bool(value: &str, flag: &str) -> Result<bool> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(CleanError::from(format!(
            "flag {flag} expects 0 or 1, got '{value}'"
        ))),
    }
}

/// Scans `argv[1..]` for the flags spec §6 lists. Unknown flags and malformed values abort
/// startup with a `CleanError` rather than silently falling back to defaults.
fn parse_args(args: impl Iterator<Item = String>) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut args = args.peekable();

    while let Some(arg) = args.next() {
        let mut take_value = |flag: &str| -> Result<String> {
            args.next()
                .ok_or_else(|| CleanError::from(format!("flag {flag} requires a value")))
        };

        match arg.as_str() {
            "-p" => cli.port = Some(take_value("-p")?.parse().map_err(|_| "invalid -p port")?),
            "-l" => cli.log_async = Some(parse_flag_bool(&take_value("-l")?, "-l")?),
            "-m" => {
                let v: u8 = take_value("-m")?.parse().map_err(|_| "invalid -m mode")?;
                if v > 3 {
                    return Err(CleanError::from("flag -m expects a value in 0..=3"));
                }
                cli.trigger_mode = Some(v);
            }
            "-o" => cli.linger_on_shutdown = Some(parse_flag_bool(&take_value("-o")?, "-o")?),
            "-s" => {
                cli.db_pool_size = Some(
                    take_value("-s")?
                        .parse()
                        .map_err(|_| "invalid -s pool size")?,
                )
            }
            "-t" => {
                cli.thread_count = Some(
                    take_value("-t")?
                        .parse()
                        .map_err(|_| "invalid -t thread count")?,
                )
            }
            "-c" => cli.log_disabled = Some(parse_flag_bool(&take_value("-c")?, "-c")?),
            "-a" => cli.concurrency_mode_reactor = Some(parse_flag_bool(&take_value("-a")?, "-a")?),
            "-f" => cli.config_path = take_value("-f")?,
            other => return Err(CleanError::from(format!("unrecognized flag '{other}'"))),
        }
    }

    Ok(cli)
}

fn apply_overrides(config: &mut AppConfig, cli: Cli) {
    if let Some(v) = cli.port {
        config.port = v;
    }
    if let Some(v) = cli.log_async {
        config.log_async = v;
    }
    if let Some(v) = cli.trigger_mode {
        config.trigger_mode = v;
    }
    if let Some(v) = cli.linger_on_shutdown {
        config.linger_on_shutdown = v;
    }
    if let Some(v) = cli.db_pool_size {
        config.db_pool_size = v;
    }
    if let Some(v) = cli.thread_count {
        config.thread_count = v;
    }
    if let Some(v) = cli.log_disabled {
        config.log_disabled = v;
    }
    if let Some(v) = cli.concurrency_mode_reactor {
        config.concurrency_mode_reactor = v;
    }
}

fn run() -> Result<()> {
    let cli = parse_args(std::env::args().skip(1))?;
    let config_path = cli.config_path.clone();

    let mut app_config = match std::fs::read_to_string(&config_path) {
        Ok(contents) => AppConfig::from_str(&contents)?,
        Err(_) => {
            println!(
                "\x1b[33mwarning:\x1b[0m config file '{config_path}' not found, starting from defaults"
            );
            AppConfig::default()
        }
    };
    apply_overrides(&mut app_config, cli);

    let problems = config::validate_config(&app_config);
    if !problems.is_empty() {
        return Err(CleanError::from(format!(
            "{} configuration problem(s) found in '{}'",
            problems.len(),
            config_path
        )));
    }

    config::display_config(&app_config);

    let server = Server::new(app_config)?;
    server.run()
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e:?}");
        std::process::exit(1);
    }
}
