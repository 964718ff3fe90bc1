use clap::{Parser, Subcommand};
use std::time::Duration;
use syncload_cli::{commands, TargetArgs, WaitArgs};
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(author, version, about = "Load generator for rsync daemons")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run simulated users until the duration elapses or Ctrl-C
    Run {
        #[command(flatten)]
        target: TargetArgs,
        #[command(flatten)]
        wait: WaitArgs,
        #[arg(short, long, default_value_t = syncload_config::DEFAULT_USERS)]
        users: usize,
        /// Stop after this many seconds
        #[arg(short, long)]
        duration_secs: Option<u64>,
    },
    /// Fetch every task once with a single user and print the events
    Once {
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let builder = FmtSubscriber::builder().with_writer(std::io::stderr);
    if std::env::var_os("RUST_LOG").is_some() {
        tracing::subscriber::set_global_default(
            builder.with_env_filter(EnvFilter::from_default_env()).finish(),
        )?;
    } else {
        tracing::subscriber::set_global_default(builder.with_max_level(level).finish())?;
    }

    match cli.command {
        Commands::Run {
            target,
            wait,
            users,
            duration_secs,
        } => {
            let snapshot =
                commands::cmd_run(target, wait, users, duration_secs.map(Duration::from_secs))
                    .await?;
            if snapshot.total_requests > 0 && snapshot.total_failures == snapshot.total_requests {
                anyhow::bail!("Every request failed");
            }
        }
        Commands::Once { target } => {
            let events = commands::cmd_once(target).await?;
            let failed = events.iter().filter(|e| !e.is_success()).count();
            if failed > 0 {
                anyhow::bail!("{failed} of {} request(s) failed", events.len());
            }
        }
    }

    Ok(())
}
