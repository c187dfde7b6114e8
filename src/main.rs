use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use touch4_boiler::config::Config;
use touch4_boiler::{AmbientSensor, Boiler};

const USAGE: &str = "usage: touch4-boiler [--env-file PATH] [status | temperature | force [OFFSET] | release | pulse SECONDS [OFFSET]]";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Status,
    Temperature,
    Force { offset: f64 },
    Release,
    /// Force, hold for a while, then release within the same process so backups survive.
    Pulse { hold: Duration, offset: f64 },
}

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

fn run(command: Command) -> Result<(), String> {
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (url={}, read_only={}, room_t_set_max={}°C)",
        cfg.url, cfg.read_only, cfg.room_t_set_max
    );

    if command == Command::Temperature {
        let mut sensor = AmbientSensor::connect(&cfg.url, &cfg.password)
            .map_err(|e| format!("Touch connection failed: {}", e))?;
        let t = sensor.temperature().map_err(|e| format!("temperature read failed: {}", e))?;
        println!("{}", t);
        return Ok(());
    }

    let mut boiler = Boiler::connect(&cfg).map_err(|e| format!("Touch connection failed: {}", e))?;
    info!("Metadata loaded from Touch");
    boiler.acquire().map_err(|e| format!("acquire failed: {}", e))?;

    match command {
        Command::Status | Command::Temperature => {}
        Command::Force { offset } => {
            ensure_control(&mut boiler)?;
            boiler
                .force_heating(offset)
                .map_err(|e| format!("force heating failed: {}", e))?;
            warn!("Force state is not persisted; a later `release` run has nothing to undo, use `pulse` instead");
        }
        Command::Release => {
            if !boiler.force_state().is_active() {
                info!("No force state in this process; nothing to release");
            }
            boiler.release_heating().map_err(|e| format!("release heating failed: {}", e))?;
        }
        Command::Pulse { hold, offset } => {
            ensure_control(&mut boiler)?;
            boiler
                .force_heating(offset)
                .map_err(|e| format!("force heating failed: {}", e))?;
            info!("Heating forced; releasing in {}s", hold.as_secs());
            thread::sleep(hold);
            boiler.acquire().map_err(|e| format!("acquire failed: {}", e))?;
            boiler.release_heating().map_err(|e| format!("release heating failed: {}", e))?;
        }
    }

    let status = boiler.status().map_err(|e| format!("status failed: {}", e))?;
    let json = serde_json::to_string_pretty(&status).map_err(|e| format!("status encoding failed: {}", e))?;
    println!("{}", json);
    Ok(())
}

fn ensure_control(boiler: &mut Boiler) -> Result<(), String> {
    let accepts = boiler
        .accepts_control()
        .map_err(|e| format!("operation mode check failed: {}", e))?;
    if accepts {
        Ok(())
    } else {
        Err("Touch operation mode does not accept control (expected AUTO or HEATING)".to_string())
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<(Option<PathBuf>, Command), String> {
    let mut env_file: Option<PathBuf> = None;
    let mut positional = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let path = if arg == "--env-file" {
            Some(args.next().ok_or_else(|| "`--env-file` requires a path argument".to_string())?)
        } else {
            arg.strip_prefix("--env-file=").map(str::to_string)
        };
        match path {
            Some(p) if p.is_empty() => return Err("`--env-file` requires a path argument".to_string()),
            Some(_) if env_file.is_some() => return Err("`--env-file` provided more than once".to_string()),
            Some(p) => env_file = Some(PathBuf::from(p)),
            None if arg.starts_with("--") => return Err(format!("unrecognised argument: {}", arg)),
            None => positional.push(arg),
        }
    }

    let number = |s: &str, what: &str| s.parse::<f64>().map_err(|_| format!("{} must be a number, got '{}'", what, s));
    let command = match positional.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        [] | ["status"] => Command::Status,
        ["temperature"] => Command::Temperature,
        ["force"] => Command::Force { offset: 0.0 },
        ["force", offset] => Command::Force {
            offset: number(*offset, "OFFSET")?,
        },
        ["release"] => Command::Release,
        ["pulse", secs, rest @ ..] if rest.len() <= 1 => {
            let secs = secs
                .parse::<u64>()
                .map_err(|_| format!("SECONDS must be a whole number, got '{}'", secs))?;
            let offset = match rest.first() {
                Some(o) => number(*o, "OFFSET")?,
                None => 0.0,
            };
            Command::Pulse {
                hold: Duration::from_secs(secs),
                offset,
            }
        }
        _ => return Err(USAGE.to_string()),
    };
    Ok((env_file, command))
}

fn configure_env(env_file: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        return Ok(Some(LoadedEnvFile { path, explicit: true }));
    }
    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let default_path = cwd.join(".env");
    if default_path.is_file() {
        load_env_file(&default_path)?;
        Ok(Some(LoadedEnvFile {
            path: default_path,
            explicit: false,
        }))
    } else {
        Ok(None)
    }
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    for (index, line) in content.lines().enumerate() {
        let Some((key, value)) =
            parse_env_line(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        // Variables already set in the process environment win.
        if std::env::var_os(&key).is_none() {
            // Updating process-level environment variables is unsafe on some targets.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

/// `KEY=VALUE`, optionally prefixed by `export`; values may be single or double quoted.
fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    let (key, raw) = line.split_once('=').ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(format!("invalid environment variable name: '{}'", key));
    }

    let raw = raw.trim();
    let value = match raw.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let inner = &raw[1..];
            let end = inner
                .find(quote)
                .ok_or_else(|| format!("unterminated {}-quoted value", quote))?;
            let rest = inner[end + 1..].trim();
            if !(rest.is_empty() || rest.starts_with('#')) {
                return Err("unexpected characters after closing quote".to_string());
            }
            inner[..end].to_string()
        }
        _ => raw.split('#').next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}

fn main() {
    let loaded_env = match parse_args(std::env::args().skip(1)).and_then(|(env_file, command)| {
        configure_env(env_file).map(|loaded| (loaded, command))
    }) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };
    let (loaded_env, command) = loaded_env;

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "touch4-boiler {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn commands() {
        assert_eq!(parse_args(args(&[])).unwrap(), (None, Command::Status));
        assert_eq!(
            parse_args(args(&["--env-file", "boiler.env", "force", "0.5"])).unwrap(),
            (Some(PathBuf::from("boiler.env")), Command::Force { offset: 0.5 })
        );
        assert_eq!(
            parse_args(args(&["pulse", "600"])).unwrap().1,
            Command::Pulse {
                hold: Duration::from_secs(600),
                offset: 0.0
            }
        );
        assert_eq!(parse_args(args(&["release"])).unwrap().1, Command::Release);
    }

    #[test]
    fn bad_arguments() {
        assert!(parse_args(args(&["force", "lots"])).is_err());
        assert!(parse_args(args(&["--verbose"])).is_err());
        assert!(parse_args(args(&["--env-file=a", "--env-file=b"])).is_err());
        assert!(parse_args(args(&["--env-file"])).is_err());
        assert!(parse_args(args(&["pulse"])).is_err());
        assert!(parse_args(args(&["stop"])).is_err());
    }

    #[test]
    fn env_lines() {
        assert_eq!(parse_env_line("# comment").unwrap(), None);
        assert_eq!(
            parse_env_line("export TOUCH_URL=http://touch:4321 # lan").unwrap(),
            Some(("TOUCH_URL".to_string(), "http://touch:4321".to_string()))
        );
        assert_eq!(
            parse_env_line("TOUCH_PASSWORD='a#b c'").unwrap(),
            Some(("TOUCH_PASSWORD".to_string(), "a#b c".to_string()))
        );
        assert!(parse_env_line("TOUCH_PASSWORD=\"open").is_err());
        assert!(parse_env_line("NO_EQUALS").is_err());
    }
}
