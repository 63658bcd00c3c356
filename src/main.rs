use entitlement_gate::{
    config::Config,
    error::GateError,
    registry::ControllerRegistry,
    runtime::{build_state, run_standalone},
};
use std::path::PathBuf;

const USAGE: &str = "\
Usage: entitlement-gate [OPTIONS]

Options:
  -c, --config <path>  Path to YAML config file
      --check          Validate configuration and exit
  -h, --help           Print help

ENTITLEMENT_GATE_* environment variables override values from the config file.
";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Serve { config_path: Option<PathBuf> },
    Check { config_path: Option<PathBuf> },
    Help,
}

fn parse_cli_args<I>(args: I) -> Result<Command, String>
where
    I: IntoIterator<Item = String>,
{
    let mut config_path = None;
    let mut check = false;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "--check" => check = true,
            "-c" | "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --config".to_string())?;
                config_path = Some(PathBuf::from(value));
            }
            _ => match arg.strip_prefix("--config=") {
                Some("") => return Err("missing value for --config".to_string()),
                Some(value) => config_path = Some(PathBuf::from(value)),
                None => return Err(format!("unknown argument: {arg}")),
            },
        }
    }
    Ok(if check {
        Command::Check { config_path }
    } else {
        Command::Serve { config_path }
    })
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config, GateError> {
    let config = match config_path {
        Some(path) => Config::from_env_with_config_file(path)?,
        None => Config::from_env()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() {
    let command = match parse_cli_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(err) => {
            eprintln!("{err}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    let result = match command {
        Command::Help => {
            println!("{USAGE}");
            return;
        }
        Command::Check { config_path } => load_config(config_path).and_then(|config| {
            build_state(&config, &ControllerRegistry::with_builtin())?;
            println!("configuration ok: {} access controller", config.access.controller);
            Ok(())
        }),
        Command::Serve { config_path } => match load_config(config_path) {
            Ok(config) => run_standalone(config).await,
            Err(err) => Err(err),
        },
    };

    match result {
        Ok(()) => {}
        Err(err @ GateError::Config(_)) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
