use clap::Parser;
use cp_agent::{
    config::AgentConfig,
    feed,
    skeleton::SkeletonAgent,
    store::{InMemoryOptionStore, InMemoryStatusStore},
    runtime::EXIT_FAILURE,
    AgentRuntime, Error, Event,
};
use std::{path::PathBuf, sync::Arc};
use tokio::io::BufReader;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "agent.json")]
    config: PathBuf,

    /// Override the agent name from the config
    #[arg(short, long)]
    name: Option<String>,

    /// Enable debug mode
    #[arg(short, long)]
    verbose: bool,
}

async fn run(cli: &Cli) -> Result<i32, Error> {
    let mut config = AgentConfig::load_or_default(&cli.config)?;
    if let Some(name) = &cli.name {
        config.name = name.clone();
    }

    info!("config loaded.");
    debug!("config: {:?}", config);

    let options = Arc::new(InMemoryOptionStore::from(config.options.clone()));
    let status = Arc::new(InMemoryStatusStore::new());
    let runtime = AgentRuntime::new(&config.name, options.clone(), status.clone());
    runtime.register_handler(Arc::new(SkeletonAgent::new()))?;

    // The control plane attaches the agent before anything else arrives.
    runtime.enqueue(Event::Initialized)?;

    let handle = runtime.handle();
    let stop_on_feed_end = config.stop_on_feed_end;
    let feed_task = {
        let handle = handle.clone();
        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            match feed::pump(stdin, &handle, &options).await {
                Ok(summary) => {
                    info!(
                        "Feed ended: {} accepted, {} rejected",
                        summary.accepted, summary.rejected
                    );
                    if stop_on_feed_end {
                        handle.close();
                    }
                    Ok(())
                }
                Err(e) => {
                    error!("Feed failed: {}", e);
                    handle.stop();
                    Err(Error::from(e))
                }
            }
        })
    };

    let signal_task = {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received, stopping agent...");
                handle.stop();
            }
        })
    };

    let result = runtime.run().await;
    signal_task.abort();
    let exit_code = result?;

    debug!("final status: {:?}", status.snapshot());
    if feed_task.is_finished() {
        feed_task
            .await
            .map_err(|e| Error::internal(format!("feed task panicked: {}", e)))??;
    } else {
        feed_task.abort();
    }
    Ok(exit_code)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(&cli).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(EXIT_FAILURE);
        }
    }
}
