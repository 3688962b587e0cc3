use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use speakstream::cli::{Cli, Commands, ConfigAction};
use speakstream::config::{ApiKey, Config};
use speakstream::defaults;
use speakstream::diagnostics::{print_report, run_checks};
use speakstream::session::manager::{SessionManager, SessionReport, SessionSettings};
use speakstream::session::transport::WebSocketConnector;
use speakstream::source::{ReaderSource, StaticSource, TokenSource};
use speakstream::streaming::pipeline::SpeechPipeline;
use speakstream::streaming::sink::ProcessAudioOutput;
use speakstream::error::SpeakError;
use speakstream::{InterruptHandle, ResyncMatcher, TeardownHandle};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match &cli.command {
        Commands::Speak { text } => {
            let config = load_config(&cli)?;
            config.validate()?;
            match text {
                Some(text) => speak(&config, &mut StaticSource::from_text(text), cli.quiet).await?,
                None => {
                    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
                    speak(&config, &mut ReaderSource::new(stdin), cli.quiet).await?
                }
            }
        }
        #[cfg(feature = "llm")]
        Commands::Ask { query } => {
            let config = load_config(&cli)?;
            config.validate()?;
            let key = ApiKey::from_env(defaults::LLM_KEY_ENV, "OpenAI")?;
            let mut source =
                speakstream::llm::ChatCompletionSource::connect(&config.llm, &key, query).await?;
            speak(&config, &mut source, cli.quiet).await?;
        }
        Commands::Resync {
            sent,
            received,
            tolerance,
        } => {
            let config = load_config(&cli)?;
            let tolerance = tolerance.unwrap_or(config.session.displacement_tolerance);
            handle_resync_command(sent, received, tolerance)?;
        }
        Commands::Check => {
            let config = load_config(&cli)?;
            if !print_report(&run_checks(&config)) {
                std::process::exit(1);
            }
        }
        Commands::Config { action } => {
            handle_config_command(action, &cli)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "speakstream",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Logs go to stderr so `resync` and `config dump` output stays pipeable.
///
/// RUST_LOG takes precedence over -q / -v.
fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("speakstream={}", cli.log_level()).into());

    let fmt_layer = if cli.log_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Command-line overrides (--voice-id, --player)
/// 2. Environment variables
/// 3. Custom config path from CLI (--config), which must exist
/// 4. Default config path (~/.config/speakstream/config.toml)
/// 5. Built-in defaults
fn load_config(cli: &Cli) -> Result<Config> {
    let config = match (&cli.config, Config::default_path()) {
        (Some(path), _) => Config::load(path)?,
        (None, Some(path)) => Config::load_or_default(&path)?,
        (None, None) => Config::default(),
    };
    let mut config = config.with_env_overrides();

    if let Some(voice) = &cli.voice_id {
        config.synthesis.voice_id = voice.clone();
    }
    if let Some(player) = &cli.player {
        config.player.program = player.clone();
    }

    Ok(config)
}

/// Speaks everything `source` yields and prints a one-line summary.
async fn speak(config: &Config, source: &mut dyn TokenSource, quiet: bool) -> Result<()> {
    let api_key = ApiKey::from_env(defaults::SYNTHESIS_KEY_ENV, "ElevenLabs")?;
    let output = ProcessAudioOutput::new(&config.player)?;
    let connector = WebSocketConnector::new(&config.synthesis)?;
    tracing::debug!(url = %connector.url(), player = %output.program().display(), "starting");

    let settings = SessionSettings::from_config(config, api_key);
    let buffer = settings.channel_buffer_size;
    let manager = SessionManager::new(Box::new(connector), Box::new(output), settings);
    let pipeline = SpeechPipeline::new(manager, buffer);
    let reconnect = spawn_reconnect_listener(pipeline.teardown_handle());
    let interrupt = spawn_interrupt_listener(pipeline.interrupt_handle());

    let result = pipeline.run(source).await;
    interrupt.abort();
    if let Some(task) = reconnect {
        task.abort();
    }

    let report = match result {
        Ok(report) => report,
        Err(SpeakError::Interrupted) => anyhow::bail!("interrupted"),
        Err(e) => return Err(e).context("speech pipeline failed"),
    };
    if !quiet {
        print_summary(&report);
    }
    Ok(())
}

/// First Ctrl-C stops playback cleanly; a second one exits immediately.
fn spawn_interrupt_listener(interrupt: InterruptHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::info!("interrupt received, stopping playback");
        interrupt.interrupt();

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "forced exit".red());
            std::process::exit(130);
        }
    })
}

/// SIGHUP forces the active session to drop and resume on a fresh one.
#[cfg(unix)]
fn spawn_reconnect_listener(teardown: TeardownHandle) -> Option<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::debug!(error = %e, "SIGHUP reconnect unavailable");
            return None;
        }
    };
    Some(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, reconnecting");
            teardown.tear_down();
        }
    }))
}

#[cfg(not(unix))]
fn spawn_reconnect_listener(_teardown: TeardownHandle) -> Option<tokio::task::JoinHandle<()>> {
    None
}

fn print_summary(report: &SessionReport) {
    let retries = report.retries();
    let retries = if retries == 0 {
        "no retries".to_string()
    } else {
        format!("{} retries", retries).yellow().to_string()
    };
    eprintln!(
        "{} {} chars, {} bytes of audio, {}",
        "✓ Spoken".green(),
        report.chars_sent,
        report.bytes_played,
        retries
    );
}

/// Prints the unconfirmed remainder of `sent` to stdout.
fn handle_resync_command(sent: &str, received: &str, tolerance: usize) -> Result<()> {
    let matcher = ResyncMatcher::new(tolerance);
    let sent: Vec<char> = sent.chars().collect();
    let received: Vec<String> = received.chars().map(String::from).collect();

    let resync = matcher.resync(&sent, &received)?;
    eprintln!(
        "{} resume at character {} ({} displacements)",
        "→".cyan(),
        resync.resume_at,
        resync.displacements
    );
    println!("{}", resync.remaining);
    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(action: &ConfigAction, cli: &Cli) -> Result<()> {
    match action {
        ConfigAction::Dump { defaults } => {
            let config = if *defaults {
                Config::default()
            } else {
                load_config(cli)?
            };
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => match cli.config.clone().or_else(Config::default_path) {
            Some(path) => println!("{}", path.display()),
            None => {
                eprintln!("Error: no configuration directory on this system");
                std::process::exit(1);
            }
        },
    }
    Ok(())
}
