//! Entry point for `group-comm`.
//!
//! Parses CLI arguments, loads the group, and runs the interactive menu.
//! All protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, operator I/O).

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use group_comm::{
    Event, FaultInjector, Group, LogSettings, Middleware, NodeConfig, PeerAddress, PeerState,
    Trigger,
};

/// Reliable group communication over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// This peer's id; must appear in the group configuration.
    #[arg(short = 'i', long)]
    peer_id: u32,
    /// Listening port; must match the group entry of `peer_id`.
    #[arg(short, long)]
    port: u16,
    /// Path of the JSON group configuration file.
    #[arg(short, long)]
    group_conf: PathBuf,
    /// Directory for log files (must end with '/').
    #[arg(short = 'd', long)]
    log_dir: Option<String>,
    /// Fault injection: id of the message to corrupt on arrival.
    #[arg(long)]
    error_id: Option<String>,
    /// Fault injection: index of the payload bit to toggle.
    #[arg(long)]
    error_bit: Option<usize>,
}

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let group = match Group::load(&cli.group_conf) {
        Ok(group) => group,
        Err(e) => {
            eprintln!("Please specify a valid group config file! ({e})");
            std::process::exit(1);
        }
    };
    let config = match NodeConfig::new(group, cli.peer_id, cli.port) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid peer ID and port combination! ({e})");
            std::process::exit(1);
        }
    };

    let mut log_settings = LogSettings::default();
    if let Some(dir) = cli.log_dir.as_deref() {
        match log_settings.change(dir) {
            Ok(path) => println!("Your logs will be stored in: {}", path.display()),
            Err(e) => println!("{e}. Continuing with default directory."),
        }
    }

    let fault = FaultInjector::from_options(cli.error_id, cli.error_bit);
    let config = config.with_fault(fault);
    let local = config.local;

    let middleware = Middleware::bind(config)
        .await
        .context("failed to start peer")?;
    tokio::spawn(print_events(middleware.subscribe()));

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_menu(log_settings.dir());
        let Some(action) = prompt(&mut input, "Enter an option: ").await? else {
            break;
        };
        match action.trim() {
            "0" => break,
            "1" => {
                begin_operating(&mut log_settings, local);
                match middleware.listen() {
                    Ok(()) => println!("Peer {} is listening on port {}", local.id, local.port),
                    Err(e) => println!("{e}"),
                }
            }
            "2" => {
                begin_operating(&mut log_settings, local);
                println!("This peer is sending");
                if middleware.state() == PeerState::Idle {
                    if let Err(e) = middleware.listen() {
                        println!("{e}");
                    }
                }
                let Some(payload) = prompt(&mut input, "Please enter your message: ").await?
                else {
                    break;
                };
                match middleware.send(payload) {
                    Ok(verdict) => match verdict.await {
                        Ok(verdict) => println!("{verdict}"),
                        Err(_) => println!("Broadcast was cancelled"),
                    },
                    Err(e) => println!("{e}"),
                }
            }
            "3" => {
                if let Err(e) = log_settings.ensure_unlocked() {
                    println!("{e}!");
                    continue;
                }
                let Some(dir) =
                    prompt(&mut input, "Please enter an alternative logging directory: ").await?
                else {
                    break;
                };
                match log_settings.change(dir.trim()) {
                    Ok(path) => println!("Your logs will be stored in: {}", path.display()),
                    Err(e) => println!("{e}. Continuing with current directory."),
                }
            }
            _ => {
                println!();
                println!("!! OPTION INVALID !!");
            }
        }
    }

    middleware.shutdown().await;
    Ok(())
}

fn print_menu(log_dir: &Path) {
    println!();
    println!("** MENU **");
    println!("0 : exit");
    println!("1 : listen for messages");
    println!("2 : send message");
    println!("3 : change logging path (current: {})", log_dir.display());
    println!();
}

async fn prompt(input: &mut Input, text: &str) -> Result<Option<String>> {
    print!("{text}");
    std::io::stdout().flush()?;
    Ok(input.next_line().await?)
}

/// Lock the log directory and route logging into it, once.
fn begin_operating(settings: &mut LogSettings, local: PeerAddress) {
    if settings.is_locked() {
        return;
    }
    match settings.lock().map(Path::to_path_buf) {
        Ok(dir) => match init_file_logging(&dir, local) {
            Ok(file) => println!("Logging to: {}", file.display()),
            Err(e) => {
                eprintln!("cannot log to {}: {e:#}", dir.display());
                let _ = env_logger::try_init();
            }
        },
        Err(e) => {
            eprintln!("{e}");
            let _ = env_logger::try_init();
        }
    }
}

fn init_file_logging(dir: &Path, local: PeerAddress) -> Result<PathBuf> {
    let stamp = chrono::Local::now().format("%d.%m.%Y.%H-%M-%S");
    let path = dir.join(format!("{},{}_{stamp}.log", local.id, local.port));
    let file = std::fs::File::create(&path)
        .with_context(|| format!("creating {}", path.display()))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()?;
    Ok(path)
}

/// Print diagnostics as they happen.  Verdicts of local sends are printed by
/// the menu itself.
async fn print_events(mut events: tokio::sync::broadcast::Receiver<Event>) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match events.recv().await {
            Ok(Event::Completed {
                trigger: Trigger::Local,
                ..
            })
            | Ok(Event::Listening { .. }) => {}
            Ok(event) => println!("{event}"),
            Err(RecvError::Lagged(n)) => println!("({n} diagnostics skipped)"),
            Err(RecvError::Closed) => break,
        }
    }
}
