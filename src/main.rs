mod config;
mod inspect;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use cls_collect::{CollectError, Collector};
use cls_format::{parse, render};
use cls_redact::{Redactor, UserEnvironment};
use cls_remote::{
    Connector, MonoConnector, RemoteError, RemoteSession, connect_endpoint, connect_process,
    discover_and_connect_all,
};
use cls_types::{Endpoint, ProcessId, SaverConfig};

use crate::config::Config;
use crate::inspect::Summary;

/// Save the Unity editor console log through the Mono soft debugger
#[derive(Parser, Debug)]
#[command(name = "console-log-saver")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to <config dir>/console-log-saver/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Attach to an editor and save its console log
    Save(SaveArgs),

    /// List reachable editors and their project directories
    List,

    /// Summarise a saved log file
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct SaveArgs {
    /// Editor process id (discovered when omitted)
    #[arg(value_name = "PID", conflicts_with = "port")]
    pid: Option<ProcessId>,

    /// Debugger agent port on localhost
    #[arg(long)]
    port: Option<u16>,

    /// Write to FILE instead of stdout
    #[arg(short, long, value_name = "FILE", conflicts_with = "auto_name")]
    output: Option<PathBuf>,

    /// Write to console-log-<timestamp>.txt in the current directory
    #[arg(long)]
    auto_name: bool,

    #[command(flatten)]
    privacy: PrivacyArgs,
}

/// Overrides for what the saved log may contain
#[derive(clap::Args, Debug, Default)]
struct PrivacyArgs {
    #[arg(long, overrides_with = "show_user_name")]
    hide_user_name: bool,
    #[arg(long)]
    show_user_name: bool,

    #[arg(long, overrides_with = "show_user_home")]
    hide_user_home: bool,
    #[arg(long)]
    show_user_home: bool,

    #[arg(long, overrides_with = "show_os_info")]
    hide_os_info: bool,
    #[arg(long)]
    show_os_info: bool,

    #[arg(long, overrides_with = "show_aws_upload_signature")]
    hide_aws_upload_signature: bool,
    #[arg(long)]
    show_aws_upload_signature: bool,
}

impl PrivacyArgs {
    fn apply(&self, mut config: SaverConfig) -> SaverConfig {
        fn set(value: &mut bool, hide: bool, show: bool) {
            if hide {
                *value = true;
            } else if show {
                *value = false;
            }
        }
        set(&mut config.hide_user_name, self.hide_user_name, self.show_user_name);
        set(&mut config.hide_user_home, self.hide_user_home, self.show_user_home);
        set(&mut config.hide_os_info, self.hide_os_info, self.show_os_info);
        set(
            &mut config.hide_aws_upload_signature,
            self.hide_aws_upload_signature,
            self.show_aws_upload_signature,
        );
        config
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    if let Err(e) = run(args, cancel).await {
        match remote_cause(&e) {
            Some(RemoteError::RemoteDisconnected) => eprintln!("Error: target process exited"),
            Some(RemoteError::ConnectionFailed { .. } | RemoteError::Cancelled) => {
                eprintln!("Error: {:#}", e);
                eprintln!("hint: pass the editor PID or its debugger port with --port");
            }
            _ => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run(args: Args, cancel: CancellationToken) -> Result<()> {
    match args.command {
        Command::Inspect { file } => inspect(&file),
        Command::List => {
            let config = Config::load(args.config.as_deref())?;
            list(&config, &cancel).await
        }
        Command::Save(save_args) => {
            let config = Config::load(args.config.as_deref())?;
            save(save_args, &config, &cancel).await
        }
    }
}

async fn save(args: SaveArgs, config: &Config, cancel: &CancellationToken) -> Result<()> {
    let saver = args.privacy.apply(config.saver.clone());
    let redactor = Redactor::new(&saver, &UserEnvironment::current()).context("Failed to build redaction rules")?;
    let collector = Collector::new(saver, redactor);

    let connector: Arc<dyn Connector> = Arc::new(MonoConnector);
    let mut session = match (args.pid, args.port) {
        (Some(pid), _) => connect_process(connector, pid, config.connect_timeout(), cancel)
            .await
            .with_context(|| format!("Failed to attach to process {pid}"))?,
        (None, Some(port)) => connect_endpoint(connector, Endpoint::localhost(port), config.connect_timeout(), cancel)
            .await
            .with_context(|| format!("Failed to attach to port {port}"))?,
        (None, None) => discover_one(connector, config, cancel).await?,
    };

    let collected = collector.collect(&mut session, cancel).await;
    session.dispose().await;
    let doc = collected.context("Failed to collect the console log")?;
    let text = render(&doc);

    let path = match (args.output, args.auto_name) {
        (Some(path), _) => Some(path),
        (None, true) => Some(PathBuf::from(
            chrono::Local::now()
                .format("console-log-%Y%m%d-%H%M%S.txt")
                .to_string(),
        )),
        (None, false) => None,
    };
    match path {
        Some(path) => {
            fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Saved {} entries to {}", doc.sections().len(), path.display());
        }
        None => std::io::stdout()
            .lock()
            .write_all(text.as_bytes())
            .context("Failed to write to stdout")?,
    }
    Ok(())
}

/// Pick the first reachable editor, dropping any others
async fn discover_one(connector: Arc<dyn Connector>, config: &Config, cancel: &CancellationToken) -> Result<RemoteSession> {
    let mut sessions = discover_and_connect_all(connector, config.discovery_timeout(), cancel).await?;
    if sessions.is_empty() {
        anyhow::bail!("No reachable Unity editor found; pass its PID or --port");
    }
    let chosen = sessions.remove(0);
    if !sessions.is_empty() {
        tracing::warn!(
            pid = ?chosen.pid(),
            project = chosen.project_root(),
            others = sessions.len(),
            "Several editors found, saving the first; pass a PID to choose"
        );
    }
    for mut other in sessions {
        other.dispose().await;
    }
    Ok(chosen)
}

async fn list(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let connector: Arc<dyn Connector> = Arc::new(MonoConnector);
    let sessions = discover_and_connect_all(connector, config.discovery_timeout(), cancel).await?;
    if sessions.is_empty() {
        eprintln!("No reachable Unity editor found");
    }
    for mut session in sessions {
        match session.pid() {
            Some(pid) => println!("{pid} for {}", session.project_root()),
            None => println!("{} for {}", session.endpoint(), session.project_root()),
        }
        session.dispose().await;
    }
    Ok(())
}

fn inspect(file: &Path) -> Result<()> {
    let text = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let doc = parse(&text).with_context(|| format!("{} is not a saved console log", file.display()))?;
    print!("{}", Summary::from_document(&doc));
    Ok(())
}

/// The remote failure behind an error, if any
fn remote_cause(e: &anyhow::Error) -> Option<&RemoteError> {
    e.chain().find_map(|cause| {
        cause.downcast_ref::<RemoteError>().or(match cause.downcast_ref::<CollectError>() {
            Some(CollectError::Remote(remote)) => Some(remote),
            _ => None,
        })
    })
}
