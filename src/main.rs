//! Punchcard CLI
//!
//! ```text
//! punchcard query entity:1             one request, print the reply
//! punchcard watch entity:1 entity:2    poll and print every reply
//! punchcard serve --bind tcp://127.0.0.1:1234
//! ```
//!
//! Log level comes from `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use tracing_subscriber::EnvFilter;

use punchcard::decode::Utf8Decoder;
use punchcard::{Client, ClientConfig, Endpoint, Job, ReplyServer, entity_handler};

#[derive(Parser)]
#[command(name = "punchcard")]
#[command(about = "Poll a request/reply service and print what comes back", long_about = None)]
struct Args {
    /// JSON config file (defaults apply for anything missing)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the endpoint, e.g. tcp://127.0.0.1:1234
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Override the poll interval in milliseconds
    #[arg(long, global = true)]
    interval_ms: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one request and print the reply
    Query {
        /// Identifier to request, e.g. entity:1
        id: String,
    },
    /// Subscribe to identifiers and print each reply as it arrives
    Watch {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Stop after this many replies in total
        #[arg(long)]
        count: Option<usize>,
    },
    /// Run the demo REP server
    Serve {
        /// Address to bind (defaults to the configured endpoint)
        #[arg(long)]
        bind: Option<String>,
    },
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(endpoint) = &args.endpoint {
        config.endpoint.clone_from(endpoint);
    }
    if let Some(ms) = args.interval_ms {
        config.poll_interval_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

fn query(config: &ClientConfig, id: &str) -> Result<()> {
    let client = Client::connect(config).context("connecting")?;
    let reply = client.query(id, &Utf8Decoder)?;
    println!("{reply}");
    client.shutdown();
    Ok(())
}

fn watch(config: &ClientConfig, ids: &[String], count: Option<usize>) -> Result<()> {
    let client = Client::connect(config).context("connecting")?;

    // Replies are printed on this thread; the worker only queues them.
    let (jobs, inbox) = mpsc::channel::<Job>();
    let mut handles = Vec::with_capacity(ids.len());
    for id in ids {
        let label = id.clone();
        let handle = client.watch(id, Utf8Decoder, jobs.clone(), move |reply: String| {
            println!("{label}: {reply}");
        })?;
        handles.push(handle);
    }
    drop(jobs);
    info!("watching {} identifier(s) on {}", ids.len(), config.endpoint);

    let mut seen = 0usize;
    while count.is_none_or(|limit| seen < limit) {
        match inbox.recv_timeout(Duration::from_millis(250)) {
            Ok(job) => {
                job();
                seen += 1;
            }
            Err(mpsc::RecvTimeoutError::Timeout) if !client.is_closed() => {}
            Err(_) => break,
        }
    }

    for handle in &handles {
        client.unsubscribe(handle);
    }
    client.shutdown();
    Ok(())
}

fn serve(config: &ClientConfig, bind: Option<&str>) -> Result<()> {
    let endpoint: Endpoint = bind.unwrap_or(&config.endpoint).parse()?;
    let server = ReplyServer::bind(&endpoint).with_context(|| format!("binding {endpoint}"))?;
    server.serve(entity_handler());
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();
    let config = load_config(&args)?;

    match &args.command {
        Command::Query { id } => query(&config, id),
        Command::Watch { ids, count } => watch(&config, ids, *count),
        Command::Serve { bind } => serve(&config, bind.as_deref()),
    }
}
