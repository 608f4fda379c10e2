use anyhow::{bail, Result};
use clap::Parser;
use rtt_bench::roles::requester::{run_requester, RequesterConfig, DEFAULT_SAMPLES};
use rtt_bench::transport::config::{available_engines, parse_connect_kv, parse_engine};
use std::num::NonZeroU32;
use tracing::error;

#[derive(Parser)]
#[command(name = "rtt-bench")]
#[command(about = "Shortest-path request/reply round-trip latency benchmark over AMQP")]
struct Cli {
    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Messaging engine: amqp, or mock (in-process dry run; needs a build with --features transport-mock)
    #[arg(long, default_value = "amqp")]
    engine: String,

    /// Broker URL with credentials (overrides --connect)
    #[arg(long)]
    url: Option<String>,

    /// Engine connect options as KEY=VALUE (repeatable): host, port, user, pass, vhost, url
    #[arg(long, value_parser = clap::builder::NonEmptyStringValueParser::new())]
    connect: Vec<String>,

    /// Number of successful round trips to measure
    #[arg(long, default_value_t = NonZeroU32::new(DEFAULT_SAMPLES).unwrap_or(NonZeroU32::MIN))]
    samples: NonZeroU32,

    /// Origin label sent with each request
    #[arg(long, default_value = "A")]
    origin: String,

    /// Destination label sent with each request
    #[arg(long, default_value = "E")]
    dest: String,

    /// Per-reply timeout in milliseconds (0 = wait forever)
    #[arg(long, default_value = "0")]
    timeout_ms: u64,

    /// Consecutive responder errors tolerated per cycle (unbounded if omitted)
    #[arg(long)]
    max_retries: Option<u64>,

    /// Log received paths at debug instead of info
    #[arg(long, default_value = "false")]
    quiet_paths: bool,

    /// Optional CSV output file path (stdout if omitted)
    #[arg(long)]
    csv: Option<String>,

    /// Enable connection retry with exponential backoff
    #[arg(long, default_value = "false")]
    enable_retry: bool,

    /// Maximum number of connection retry attempts
    #[arg(long, default_value = "3")]
    retry_count: u32,

    /// Initial delay between retries in milliseconds
    #[arg(long, default_value = "1000")]
    retry_delay: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    rtt_bench::logging::init(&cli.log_level)?;

    let Some(engine) = parse_engine(&cli.engine) else {
        bail!(
            "unknown engine {:?}; this build supports: {} (mock needs --features transport-mock)",
            cli.engine,
            available_engines().join(", ")
        );
    };
    let mut conn = parse_connect_kv(&cli.connect);
    if let Some(url) = cli.url {
        conn.params.insert("url".into(), url);
    }
    // Wire retry options
    conn.retry_enabled = cli.enable_retry;
    conn.retry_count = cli.retry_count;
    conn.retry_delay_ms = cli.retry_delay;
    conn.retry_max_delay_ms = 30000; // 30s max delay

    let config = RequesterConfig {
        engine,
        connect: conn,
        samples: cli.samples,
        origin: cli.origin,
        destination: cli.dest,
        reply_timeout_ms: (cli.timeout_ms > 0).then_some(cli.timeout_ms),
        max_retries: cli.max_retries,
        log_paths: !cli.quiet_paths,
        output_file: cli.csv,
    };

    if let Err(e) = run_requester(config).await {
        error!(error = %e, "Benchmark aborted");
        return Err(e);
    }
    Ok(())
}
