//! Share a terminal in a Floobits workspace.

use eyre::WrapErr as _;
use flootty_client::term::{self, LocalTerminal};
use flootty_client::{DEFAULT_TERM_NAME, Flootty, Intent, Settings};
use flootty_config::{DEFAULT_HOST, Floorc, Workspace};

#[derive(clap::Parser)]
#[command(name = "flootty", version, about = "Share a terminal in a Floobits workspace")]
struct Args {
    /// Terminal to join, or to create with --create.
    name: Option<String>,

    /// Share a new terminal instead of joining one.
    #[arg(short, long, conflicts_with = "list")]
    create: bool,

    /// List the workspace's terminals and exit.
    #[arg(short, long)]
    list: bool,

    /// Workspace URL, e.g. https://floobits.com/owner/workspace
    #[arg(long, conflicts_with_all = ["workspace", "owner"])]
    url: Option<String>,

    /// Workspace name (requires --owner).
    #[arg(short, long)]
    workspace: Option<String>,

    /// Workspace owner (requires --workspace).
    #[arg(short, long)]
    owner: Option<String>,

    /// Server host. Deprecated: use --url.
    #[arg(long)]
    host: Option<String>,

    /// Server port. Deprecated: use --url.
    #[arg(long)]
    port: Option<u16>,

    /// Defaults to `username` in ~/.floorc.
    #[arg(long)]
    username: Option<String>,

    /// Defaults to `secret` in ~/.floorc.
    #[arg(long)]
    secret: Option<String>,

    /// Let other users press enter in a terminal you share.
    #[arg(long = "unsafe")]
    unsafe_input: bool,

    /// Connect without TLS.
    #[arg(long)]
    no_ssl: bool,

    /// Don't tag the shared shell's prompt with the terminal name.
    #[arg(long)]
    preserve_ps1: bool,

    /// Don't follow local window size changes.
    #[arg(long)]
    no_resize: bool,

    /// Enable debug logging to ~/.flootty/logs/
    #[arg(long)]
    debug: bool,
}

fn init_logging(debug: bool) -> eyre::Result<()> {
    if debug {
        let log_dir = dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".flootty")
            .join("logs");
        std::fs::create_dir_all(&log_dir)
            .wrap_err_with(|| format!("failed to create {}", log_dir.display()))?;

        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let log_path = log_dir.join(format!("{timestamp}.log"));
        let log_file = std::fs::File::create(&log_path)
            .wrap_err_with(|| format!("failed to create {}", log_path.display()))?;

        tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .init();

        eprintln!("debug log: {}", log_path.display());
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }
    Ok(())
}

/// `--url`, then `--workspace`/`--owner`, then the nearest `.floo` file.
fn resolve_workspace(args: &Args, floorc: &Floorc) -> eyre::Result<Workspace> {
    if args.host.is_some() || args.port.is_some() {
        tracing::warn!("--host and --port are deprecated");
        eprintln!("warning: --host and --port are deprecated, use --url instead");
    }

    let workspace = match (&args.url, &args.workspace, &args.owner) {
        (Some(url), _, _) => Workspace::parse_url(url)?,
        (None, Some(name), Some(owner)) => {
            let host = args
                .host
                .as_deref()
                .or_else(|| floorc.default_host())
                .unwrap_or(DEFAULT_HOST);
            Workspace::new(host, args.port, !args.no_ssl, owner, name)
        }
        (None, Some(_), None) | (None, None, Some(_)) => {
            eyre::bail!("--workspace and --owner must be given together")
        }
        (None, None, None) => {
            let cwd = std::env::current_dir().wrap_err("failed to read the current directory")?;
            let path = flootty_config::find_floo_file(&cwd).ok_or_else(|| {
                eyre::eyre!(
                    "no workspace given: pass --url, or --workspace and --owner, \
                     or run inside a directory with a .floo file"
                )
            })?;
            tracing::info!("using workspace from {}", path.display());
            Workspace::from_floo_file(&path)?
        }
    };

    Ok(if args.no_ssl {
        workspace.without_tls()
    } else {
        workspace
    })
}

fn intent(args: &Args) -> Intent {
    if args.list {
        Intent::List
    } else if args.create {
        Intent::Create(
            args.name
                .clone()
                .unwrap_or_else(|| DEFAULT_TERM_NAME.to_string()),
        )
    } else {
        Intent::Join(args.name.clone())
    }
}

fn build_settings(args: &Args) -> eyre::Result<Settings> {
    let config = flootty_config::load().wrap_err("failed to load flootty configuration")?;
    let floorc = Floorc::load();

    let username = args
        .username
        .as_deref()
        .or_else(|| floorc.username())
        .ok_or_else(|| eyre::eyre!("no username: set `username` in ~/.floorc or pass --username"))?;
    let secret = args
        .secret
        .as_deref()
        .or_else(|| floorc.secret())
        .ok_or_else(|| eyre::eyre!("no secret: set `secret` in ~/.floorc or pass --secret"))?;
    let workspace = resolve_workspace(args, &floorc)?;

    let mut settings = Settings::new(username, secret, workspace, intent(args), &config);
    settings.safe = !args.unsafe_input;
    settings.preserve_prompt = args.preserve_ps1;
    settings.resize = !args.no_resize;
    Ok(settings)
}

/// Restore the terminal, report why, and exit non-zero.
fn die(reason: &dyn std::fmt::Display) -> ! {
    term::restore();
    // Only the debug log file gets this; stderr gets the line below.
    tracing::debug!("exiting: {reason}");
    eprintln!("\r\nflootty: {reason}");
    std::process::exit(1)
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let args = <Args as clap::Parser>::parse();
    init_logging(args.debug)?;

    let settings = build_settings(&args)?;
    tracing::info!(
        "workspace {} as {}, {:?}",
        settings.workspace.url(),
        settings.username,
        settings.intent
    );

    term::install_panic_hook();
    term::install_signal_handlers().wrap_err("failed to install signal handlers")?;
    let local = LocalTerminal::stdio().wrap_err("failed to open the terminal")?;

    let result = Flootty::new(&settings, local).and_then(|mut client| client.run());
    match result {
        Ok(()) => {
            term::restore();
            Ok(())
        }
        Err(e) => die(&e),
    }
}
