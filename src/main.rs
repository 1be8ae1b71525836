use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use jobrelay::client::{self, Commander};
use jobrelay::config::ServerConfig;
use jobrelay::server::Server;
use jobrelay::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "jobrelay")]
#[command(version)]
#[command(about = "A remote shell-job execution service")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a jobrelay server
    Server(ServerArgs),

    /// Submit a job for execution and wait for its output
    IssueJob {
        #[command(flatten)]
        client: ClientArgs,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,

        /// The shell command to execute (e.g. "echo hello")
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Adjust how many jobs may execute concurrently
    SetConcurrency {
        #[command(flatten)]
        client: ClientArgs,

        /// New concurrency level (any integer; zero or negative stalls all
        /// workers until raised again)
        #[arg(allow_hyphen_values = true)]
        level: i64,
    },

    /// Remove a queued job before it executes
    Stop {
        #[command(flatten)]
        client: ClientArgs,

        /// The job id (e.g. job_3)
        job_id: String,
    },

    /// List the jobs currently queued
    Poll {
        #[command(flatten)]
        client: ClientArgs,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },

    /// Terminate the server
    Exit {
        #[command(flatten)]
        client: ClientArgs,
    },
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port to listen on
    #[arg(long, default_value = "7461")]
    port: u16,

    /// Maximum number of jobs that may wait in the queue
    #[arg(long, default_value = "8")]
    buffer_size: i64,

    /// Number of worker units executing jobs
    #[arg(long, default_value = "4")]
    thread_pool_size: i64,
}

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Server host name or address
    #[arg(long, short = 's', default_value = "127.0.0.1")]
    server: String,

    /// Server port
    #[arg(long, short = 'p', default_value = "7461")]
    port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct SubmitOutput {
    job_id: Option<String>,
    output: String,
    delivered: bool,
}

#[derive(Serialize)]
struct PollJob {
    job_id: String,
    command: String,
}

#[derive(Serialize)]
struct PollOutput {
    jobs: Vec<PollJob>,
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Validated before any socket is opened; bad sizes exit non-zero here.
    let config = ServerConfig::new(args.port, args.buffer_size, args.thread_pool_size)?;

    let shutdown = CancellationToken::new();
    install_shutdown_handler(&shutdown);
    let server = Server::new(config, shutdown);
    server.run().await?;
    Ok(())
}

async fn handle_issue_job(
    client_args: &ClientArgs,
    output: OutputFormat,
    words: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let job = words.join(" ");
    if job.trim().is_empty() {
        eprintln!("Error: job command cannot be empty");
        std::process::exit(1);
    }

    let echo = output == OutputFormat::Table;
    let mut commander = Commander::connect(&client_args.server, client_args.port, echo).await?;

    match output {
        OutputFormat::Table => {
            // Bulk bytes stream straight to stdout between the echoed
            // header and footer.
            let mut stdout = tokio::io::stdout();
            commander.issue_job(&job, &mut stdout).await?;
        }
        OutputFormat::Json => {
            let mut captured = Vec::new();
            let run = commander.issue_job(&job, &mut captured).await?;
            let out = SubmitOutput {
                job_id: client::parse_job_id(&run.ack),
                output: String::from_utf8_lossy(&captured).into_owned(),
                delivered: run.footer.is_some(),
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

async fn handle_poll(
    client_args: &ClientArgs,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let echo = output == OutputFormat::Table;
    let mut commander = Commander::connect(&client_args.server, client_args.port, echo).await?;
    let listing = commander.poll().await?;

    if output == OutputFormat::Json {
        let jobs = listing
            .lines()
            .filter_map(|line| {
                let (id, cmd) = line.split_once(", ")?;
                Some(PollJob {
                    job_id: id.to_string(),
                    command: cmd.to_string(),
                })
            })
            .collect();
        let out = PollOutput { jobs };
        println!("{}", serde_json::to_string_pretty(&out)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::IssueJob {
            client,
            output,
            command,
        } => {
            handle_issue_job(&client, output, command).await?;
        }
        Commands::SetConcurrency { client, level } => {
            let mut commander = Commander::connect(&client.server, client.port, true).await?;
            commander.set_concurrency(level).await?;
        }
        Commands::Stop { client, job_id } => {
            let mut commander = Commander::connect(&client.server, client.port, true).await?;
            commander.stop(&job_id).await?;
        }
        Commands::Poll { client, output } => {
            handle_poll(&client, output).await?;
        }
        Commands::Exit { client } => {
            let mut commander = Commander::connect(&client.server, client.port, true).await?;
            commander.exit().await?;
        }
    }

    Ok(())
}
