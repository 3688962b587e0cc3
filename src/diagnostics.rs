//! System diagnostics and dependency checking.
//!
//! Verifies that the audio player is installed and that configuration and
//! credentials are in place before any text is synthesized.

use crate::config::{ApiKey, Config};
use crate::defaults;
use crate::session::protocol::session_url;
use crate::streaming::sink::find_program;
use std::path::Path;
use std::process::Command;

/// Result of a dependency check.
#[derive(Debug, PartialEq)]
pub enum CheckResult {
    /// Check passed, with an optional detail line
    Ok(Option<String>),
    /// Tool or setting is missing
    NotFound,
    /// Present but has issues
    Warning(String),
}

/// One line of the diagnostics report.
#[derive(Debug, PartialEq)]
pub struct Diagnostic {
    pub name: String,
    pub result: CheckResult,
    /// Whether `speak` cannot work without it.
    pub required: bool,
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn passed(&self) -> bool {
        matches!(self.result, CheckResult::Ok(_))
    }
}

/// Check if an executable runs with `--version`.
fn check_command(program: &Path) -> CheckResult {
    match Command::new(program).arg("--version").output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty());
            CheckResult::Ok(version)
        }
        Ok(_) => CheckResult::Warning(format!(
            "'{}' found but --version failed",
            program.display()
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CheckResult::NotFound,
        Err(e) => CheckResult::Warning(format!("Error checking '{}': {}", program.display(), e)),
    }
}

fn check_player(config: &Config) -> Diagnostic {
    let program = &config.player.program;
    let result = match find_program(program) {
        Some(path) => check_command(&path),
        None => CheckResult::NotFound,
    };
    let hint = matches!(result, CheckResult::NotFound).then(|| {
        [
            format!("Install: sudo apt install {program}  (Debian/Ubuntu)"),
            format!("         sudo pacman -S {program}    (Arch)"),
        ]
        .join("\n")
    });
    Diagnostic {
        name: format!("{program} (audio player)"),
        result,
        required: true,
        hint,
    }
}

fn check_api_key(env_var: &str, service: &str, required: bool) -> Diagnostic {
    let result = match ApiKey::from_env(env_var, service) {
        Ok(_) => CheckResult::Ok(None),
        Err(_) => CheckResult::NotFound,
    };
    let hint = (!matches!(result, CheckResult::Ok(_))).then(|| format!("export {env_var}=..."));
    Diagnostic {
        name: format!("{env_var} ({service} API key)"),
        result,
        required,
        hint,
    }
}

fn check_config(config: &Config) -> Diagnostic {
    let result = match config.validate() {
        Ok(()) => CheckResult::Ok(None),
        Err(e) => CheckResult::Warning(e.to_string()),
    };
    Diagnostic {
        name: "configuration".to_string(),
        result,
        required: true,
        hint: None,
    }
}

fn check_endpoint(config: &Config) -> Diagnostic {
    let result = match session_url(&config.synthesis) {
        Ok(url) => CheckResult::Ok(Some(url.to_string())),
        Err(e) => CheckResult::Warning(e.to_string()),
    };
    Diagnostic {
        name: "synthesis endpoint".to_string(),
        result,
        required: true,
        hint: None,
    }
}

/// Run all checks against `config`.
pub fn run_checks(config: &Config) -> Vec<Diagnostic> {
    vec![
        check_config(config),
        check_endpoint(config),
        check_player(config),
        check_api_key(defaults::SYNTHESIS_KEY_ENV, "ElevenLabs", true),
        // Only `ask` needs a language model.
        check_api_key(defaults::LLM_KEY_ENV, "OpenAI", false),
    ]
}

/// Print the report. Returns true when every required check passed.
pub fn print_report(diagnostics: &[Diagnostic]) -> bool {
    println!("Checking speakstream dependencies...\n");

    for diagnostic in diagnostics {
        print!("{}: ", diagnostic.name);
        match &diagnostic.result {
            CheckResult::Ok(Some(detail)) => println!("✓ OK ({})", detail),
            CheckResult::Ok(None) => println!("✓ OK"),
            CheckResult::NotFound if diagnostic.required => println!("✗ NOT FOUND"),
            CheckResult::NotFound => println!("- not set"),
            CheckResult::Warning(msg) => println!("⚠ WARNING: {}", msg),
        }
        if let Some(hint) = &diagnostic.hint {
            for line in hint.lines() {
                println!("  {}", line);
            }
        }
    }

    let ready = diagnostics.iter().all(|d| !d.required || d.passed());
    println!();
    if ready {
        println!("✓ Ready to speak.");
    } else {
        println!("⚠ Some required checks failed; `speak` will not work until they pass.");
    }
    ready
}
