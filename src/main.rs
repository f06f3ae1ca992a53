pub mod models {
    pub mod platform;
}

pub mod catalog;
pub mod client;
pub mod config;
pub mod documents;
pub mod error;
pub mod generator;
pub mod remote;
pub mod services {
    pub mod application_interfaces;
    pub mod device_types;
    pub mod event_types;
    pub mod orchestrator;
    pub mod physical_interfaces;
    pub mod schemas;
    pub mod support;
    #[cfg(test)]
    pub mod testing;
}

use crate::catalog::CATALOG;
use crate::client::PlatformClient;
use crate::config::Config;
use crate::documents::SchemaDocuments;
use crate::services::orchestrator::{Orchestrator, Workflow};
use log::{error, info};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

#[derive(Debug, PartialEq)]
struct CliArgs {
    env_file: Option<PathBuf>,
    workflow: Workflow,
}

pub fn run(workflow: Workflow) -> Result<(), String> {
    // 1) Load config
    let cfg = if workflow.needs_remote() {
        Config::from_env()?
    } else {
        Config::local_from_env()?
    };
    info!(
        "Config loaded (workflow={}, org={}, domain={}, resource_dir={}, page_size={}, interface_prefix={}, timeout={}s)",
        workflow,
        if cfg.org_id.is_empty() { "-" } else { cfg.org_id.as_str() },
        cfg.domain,
        cfg.resource_dir.display(),
        cfg.page_size,
        cfg.interface_prefix,
        cfg.request_timeout.as_secs()
    );

    // 2) Export needs nothing but the generator
    if workflow == Workflow::Export {
        let written = SchemaDocuments::generated(CATALOG)
            .write_all(&cfg.resource_dir)
            .map_err(|e| format!("export failed: {}", e))?;
        info!("Exported {} schema document(s) to {}", written, cfg.resource_dir.display());
        return Ok(());
    }

    // 3) Resolve local schema documents once
    let documents = SchemaDocuments::load(&cfg.resource_dir, CATALOG).map_err(|e| e.to_string())?;

    // 4) Init platform client
    let client = PlatformClient::new(
        &cfg.org_id,
        &cfg.domain,
        &cfg.api_key,
        &cfg.api_token,
        cfg.request_timeout,
    )
    .map_err(|e| format!("Platform client setup failed: {}", e))?;
    info!("Platform client ready for organization {}", cfg.org_id);

    // 5) Run the workflow
    let orchestrator = Orchestrator::new(&client, CATALOG, &documents, cfg.page_size, &cfg.interface_prefix);
    let summary = orchestrator
        .run(workflow)
        .map_err(|e| format!("{} aborted: {}", workflow, e))?;
    info!("{} complete ({})", workflow, summary);

    Ok(())
}

fn parse_args<I: IntoIterator<Item = OsString>>(args: I) -> Result<CliArgs, String> {
    let mut args = args.into_iter();
    let mut env_file: Option<PathBuf> = None;
    let mut workflow: Option<Workflow> = None;

    let mut set_workflow = |value: &str| -> Result<(), String> {
        if workflow.is_some() {
            return Err(format!("more than one workflow given (`{}`)", value));
        }
        workflow = Some(value.parse::<Workflow>()?);
        Ok(())
    };

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                env_file = Some(PathBuf::from(path_str));
            }
            Some("--") => {
                if let Some(rest) = args.next() {
                    let value = rest.to_str().ok_or_else(|| "argument contains invalid UTF-8".to_string())?;
                    set_workflow(value)?;
                }
                if let Some(extra) = args.next() {
                    return Err(format!("unrecognised argument: {}", extra.to_string_lossy()));
                }
                break;
            }
            Some(s) if s.starts_with('-') => return Err(format!("unrecognised argument: {}", s)),
            Some(s) => set_workflow(s)?,
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    let workflow = workflow.ok_or_else(|| {
        "usage: gateway-factory [--env-file PATH] <create|deploy|teardown|diff|export>".to_string()
    })?;
    Ok(CliArgs { env_file, workflow })
}

fn configure_env(env_file: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        Ok(Some(LoadedEnvFile { path, explicit: true }))
    } else {
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
}

fn load_env_file(path: &Path) -> Result<(), String> {
    use std::fs::File;
    use std::io::{BufRead, BufReader};

    let file = File::open(path).map_err(|e| format!("failed to open {}: {}", path.display(), e))?;
    let reader = BufReader::new(file);

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| format!("failed to read {} at line {}: {}", path.display(), index + 1, e))?;
        match parse_env_assignment(&line) {
            Ok(Some((key, value))) => {
                // Preserve any value that was already supplied via the process environment.
                if std::env::var_os(&key).is_none() {
                    // Updating process-level environment variables is unsafe on some targets.
                    unsafe {
                        std::env::set_var(key, value);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                return Err(format!("{}:{}: {}", path.display(), index + 1, e));
            }
        }
    }

    Ok(())
}

fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let without_export = trimmed
        .strip_prefix("export ")
        .map(|s| s.trim_start())
        .unwrap_or(trimmed);

    let mut parts = without_export.splitn(2, '=');
    let key = parts
        .next()
        .map(str::trim)
        .ok_or_else(|| "missing environment variable name".to_string())?;
    let value_part = parts.next().ok_or_else(|| "missing '=' in assignment".to_string())?;

    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.chars().any(|c| c.is_whitespace()) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }

    let value = parse_env_value(value_part)?;
    Ok(Some((key.to_string(), value)))
}

fn parse_env_value(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    if let Some(rest) = trimmed.strip_prefix('"') {
        parse_double_quoted(rest)
    } else if let Some(rest) = trimmed.strip_prefix('\'') {
        parse_single_quoted(rest)
    } else {
        let value = trimmed.splitn(2, '#').next().unwrap_or_default().trim_end();
        Ok(value.to_string())
    }
}

fn parse_double_quoted(input: &str) -> Result<String, String> {
    let mut result = String::new();
    let mut chars = input.chars();
    let mut escape = false;

    while let Some(ch) = chars.next() {
        if escape {
            let value = match ch {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                '\\' => '\\',
                '"' => '"',
                other => other,
            };
            result.push(value);
            escape = false;
            continue;
        }

        match ch {
            '\\' => escape = true,
            '"' => {
                let remainder = chars.as_str().trim();
                if remainder.is_empty() || remainder.starts_with('#') {
                    return Ok(result);
                } else {
                    return Err("unexpected characters after closing double quote".to_string());
                }
            }
            other => result.push(other),
        }
    }

    if escape {
        Err("unterminated escape sequence in double-quoted value".to_string())
    } else {
        Err("unterminated double-quoted value".to_string())
    }
}

fn parse_single_quoted(input: &str) -> Result<String, String> {
    let mut result = String::new();
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        if ch == '\'' {
            let remainder = chars.as_str().trim();
            if remainder.is_empty() || remainder.starts_with('#') {
                return Ok(result);
            } else {
                return Err("unexpected characters after closing single quote".to_string());
            }
        } else {
            result.push(ch);
        }
    }

    Err("unterminated single-quoted value".to_string())
}

fn main() {
    let (workflow, loaded_env) = match parse_args(std::env::args_os().skip(1))
        .and_then(|cli| configure_env(cli.env_file).map(|env| (cli.workflow, env)))
    {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

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
        "gateway-factory {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(workflow) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn parses_workflow_and_env_file() {
        let cli = parse_args(args(&["--env-file", "prod.env", "teardown"])).expect("valid");
        assert_eq!(cli.workflow, Workflow::Teardown);
        assert_eq!(cli.env_file, Some(PathBuf::from("prod.env")));

        let cli = parse_args(args(&["create", "--env-file=dev.env"])).expect("valid");
        assert_eq!(cli.workflow, Workflow::Create);
        assert_eq!(cli.env_file, Some(PathBuf::from("dev.env")));
    }

    #[test]
    fn rejects_missing_or_repeated_workflow() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["create", "deploy"])).is_err());
        assert!(parse_args(args(&["--verbose", "create"])).is_err());
        assert!(parse_args(args(&["destroy"])).is_err());
    }

    #[test]
    fn parses_env_assignments() {
        assert_eq!(parse_env_assignment("# comment"), Ok(None));
        assert_eq!(
            parse_env_assignment("export IOT_ORG_ID=abc123 # org"),
            Ok(Some(("IOT_ORG_ID".to_string(), "abc123".to_string())))
        );
        assert_eq!(
            parse_env_assignment(r#"IOT_API_TOKEN="a\"b""#),
            Ok(Some(("IOT_API_TOKEN".to_string(), "a\"b".to_string())))
        );
        assert_eq!(
            parse_env_assignment("IOT_DOMAIN='example.com'"),
            Ok(Some(("IOT_DOMAIN".to_string(), "example.com".to_string())))
        );
        assert!(parse_env_assignment("BROKEN").is_err());
        assert!(parse_env_assignment("KEY='open").is_err());
    }
}
