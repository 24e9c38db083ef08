//! `remsh`: connect an interactive shell to a remsh server, stream from one,
//! or run the reference server.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::ArgAction;
use clap::Parser;
use clap::Subcommand;
use serde_json::json;
use tracing::warn;

use remsh_core::AliasManager;
use remsh_core::CommandRegistry;
use remsh_core::OutputFormat;
use remsh_protocol::Message;
use remsh_server::ServerContext;
use remsh_server::ShellServer;
use remsh_server::handlers;
use remsh_shell::OutputSink;
use remsh_shell::Shell;
use remsh_shell::ShellConfig;
use remsh_shell::StdinInput;
use remsh_shell::StreamingShell;
use remsh_transport::HttpConfig;
use remsh_transport::HttpTransport;
use remsh_transport::Transport;
use remsh_transport::UnixTransport;

const DEFAULT_SOCKET: &str = "/tmp/remsh.sock";

#[derive(Debug, Parser)]
#[command(author, version, about = "Interactive shell for remsh servers")]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open the request/response shell against a server.
    Connect {
        /// Unix socket of the server.
        #[arg(long, default_value = DEFAULT_SOCKET, conflicts_with = "url")]
        socket: PathBuf,

        /// HTTP endpoint of the server, e.g. http://localhost:9000.
        #[arg(long)]
        url: Option<String>,

        /// Prompt text.
        #[arg(long)]
        prompt: Option<String>,

        /// Default output format (table, json, csv, vertical).
        #[arg(long)]
        format: Option<OutputFormat>,

        #[arg(long, value_name = "FILE")]
        history_file: Option<PathBuf>,

        #[arg(long, value_name = "FILE")]
        session_file: Option<PathBuf>,

        /// Run a single command and exit with its status.
        #[arg(long, value_name = "COMMAND")]
        execute: Option<String>,
    },

    /// Open the streaming shell (server push enabled).
    Stream {
        #[arg(long, default_value = DEFAULT_SOCKET)]
        socket: PathBuf,

        /// Initial client-side filter: a `field:glob` list or a WHERE
        /// expression.
        #[arg(long)]
        filter: Option<String>,

        #[arg(long)]
        prompt: Option<String>,

        #[arg(long, value_name = "FILE")]
        history_file: Option<PathBuf>,

        #[arg(long, value_name = "FILE")]
        session_file: Option<PathBuf>,
    },

    /// Run the reference server with the stock handler set.
    Serve {
        #[arg(long, default_value = DEFAULT_SOCKET)]
        socket: PathBuf,

        /// Publish a demo data message every N seconds; 0 disables.
        #[arg(long, default_value_t = 5)]
        demo_interval: u64,
    },
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn state_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".remsh"))
}

fn default_history_file() -> Option<PathBuf> {
    state_dir().map(|dir| dir.join("history"))
}

fn default_session_file() -> Option<PathBuf> {
    state_dir().map(|dir| dir.join("session.json"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match cli.command {
        Command::Connect {
            socket,
            url,
            prompt,
            format,
            history_file,
            session_file,
            execute,
        } => {
            let transport: Arc<dyn Transport> = match url {
                Some(url) => Arc::new(HttpTransport::new(HttpConfig::new(url))),
                None => Arc::new(UnixTransport::new(&socket)),
            };
            if let Err(err) = transport.connect().await {
                warn!("{err}; starting disconnected");
            }
            let config = ShellConfig {
                prompt,
                default_format: format,
                history_path: history_file.or_else(default_history_file),
                session_path: session_file.or_else(default_session_file),
                history_capacity: None,
                aliases: AliasManager::new(),
            };
            let output = OutputSink::stdout();
            let mut shell = Shell::new(transport, config, output.clone());
            match execute {
                Some(line) => {
                    let ok = shell.execute_command(&line).await;
                    shell.shutdown().await;
                    if ok { 0 } else { 1 }
                }
                None => {
                    let mut input = StdinInput::new(output);
                    shell.run(&mut input).await
                }
            }
        }

        Command::Stream {
            socket,
            filter,
            prompt,
            history_file,
            session_file,
        } => {
            let transport = Arc::new(UnixTransport::new(&socket));
            if let Err(err) = transport.connect().await {
                warn!("{err}; starting disconnected");
            }
            let config = ShellConfig {
                prompt,
                default_format: None,
                history_path: history_file.or_else(default_history_file),
                session_path: session_file.or_else(default_session_file),
                history_capacity: None,
                aliases: AliasManager::new(),
            };
            let output = OutputSink::stdout();
            let mut shell = StreamingShell::new(transport, config, output.clone());
            if let Some(filter) = filter {
                shell.apply_filter(&filter);
            }
            let mut input = StdinInput::new(output);
            shell.run(&mut input).await
        }

        Command::Serve {
            socket,
            demo_interval,
        } => {
            let registry = Arc::new(CommandRegistry::new());
            handlers::register_defaults(&registry);

            let mut config = BTreeMap::new();
            config.insert(
                "socket".to_string(),
                json!(socket.display().to_string()),
            );
            config.insert("demo_interval".to_string(), json!(demo_interval));
            let mut context = ServerContext::with_config(config);
            context
                .container_mut()
                .insert("started_at", Arc::new(std::time::Instant::now()));
            let context = Arc::new(context);

            let server = Arc::new(ShellServer::new(&socket, registry, context));

            if demo_interval > 0 {
                let publisher = Arc::clone(&server);
                tokio::spawn(async move {
                    let mut tick: u64 = 0;
                    let mut interval =
                        tokio::time::interval(Duration::from_secs(demo_interval));
                    loop {
                        interval.tick().await;
                        tick += 1;
                        let mut metadata = BTreeMap::new();
                        metadata.insert("topic".to_string(), json!("demo/tick"));
                        publisher.broadcast(Message::data(
                            json!({"tick": tick}),
                            "demo",
                            metadata,
                        ));
                    }
                });
            }

            let runner = Arc::clone(&server);
            let task = tokio::spawn(async move { runner.run().await });
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            server.stop();
            task.await.context("server task panicked")??;
            0
        }
    };

    std::process::exit(code);
}
