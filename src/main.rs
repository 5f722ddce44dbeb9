use std::panic;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use echobot::bot::run_bot;
use echobot::config::{Config, default_env_path};
use echobot::instance::{SysinfoTable, current_program_name, ensure_single_instance};
use echobot::{BotError, Outcome};
use log::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(version, about = "Telegram bot that greets and echoes")]
struct Args {
    /// env file holding TOKEN, defaults to `.env` next to the executable
    #[clap(long)]
    pub env_file: Option<PathBuf>,
    /// skip the duplicate process check
    #[clap(long)]
    pub allow_multiple: bool,
    /// don't delete a registered webhook before polling
    #[clap(long)]
    pub keep_webhook: bool,
}

fn main() -> ExitCode {
    enable_panic_hook();
    let args = Args::parse();
    let _guard = boot();

    ExitCode::from(exit_status(panic::catch_unwind(|| run(args))))
}

/// Exit status for how `run` ended; a panic that reached `main` counts as a
/// failed start.
fn exit_status(result: std::thread::Result<Result<Outcome, BotError>>) -> u8 {
    match result {
        Ok(Ok(outcome)) => outcome.exit_code(),
        Ok(Err(err)) => {
            error!("{}", err);
            err.exit_code()
        }
        Err(_) => 1,
    }
}

fn run(args: Args) -> Result<Outcome, BotError> {
    let env_file = args.env_file.unwrap_or_else(default_env_path);
    let mut config = Config::load(&env_file)?;
    if args.allow_multiple {
        config.single_instance = false;
    }
    if args.keep_webhook {
        config.drop_webhook = false;
    }

    if config.single_instance {
        ensure_single_instance(&mut SysinfoTable::default(), &current_program_name())?;
    }

    info!(
        "starting echobot {} (settings from {})",
        env!("CARGO_PKG_VERSION"),
        config.env_file.display()
    );
    run_bot(&config)
}

fn boot() -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_ansi(false)
        .with_target(true)
        .with_writer(non_blocking)
        .finish()
        .init();

    guard
}

pub fn enable_panic_hook() {
    panic::set_hook(Box::new(move |panic_info| {
        let report = |msg: &str| {
            eprintln!("{}", msg);
            error!("{}", msg);
        };

        if let Some(location) = panic_info.location() {
            report(&format!(
                "panic occurred location in file '{}' at line {}",
                location.file(),
                location.line()
            ));
        }
        if let Some(payload) = panic_info.payload().downcast_ref::<&str>() {
            report(&format!("panic occurred payload: {}", payload));
        } else if let Some(payload) = panic_info.payload().downcast_ref::<String>() {
            report(&format!("panic occurred payload: {}", payload));
        }
    }));
}
