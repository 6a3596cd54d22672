//! Gemstone command-line client (`gem`)

use clap::{Parser, Subcommand};
use cli::{format_process_table, Client};
use schema::StartRequest;
use std::collections::HashMap;

#[derive(Parser)]
#[command(name = "gem")]
#[command(about = "Manage processes supervised by the Gemstone daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Daemon host
    #[arg(long, global = true, default_value = "127.0.0.1")]
    host: String,

    /// Daemon port
    #[arg(long, global = true, default_value_t = 9876)]
    port: u16,

    /// Bearer token for the control plane
    #[arg(long, global = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List all managed processes
    List,
    /// Create and start a new process
    Start {
        /// Unique process name
        name: String,
        /// Command to execute
        command: String,
        /// Arguments passed to the command (flags must come before them)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Working directory for the child
        #[arg(long)]
        workdir: Option<String>,
        /// Environment variables as KEY=VALUE (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Start this process when the daemon boots
        #[arg(long)]
        auto_start: bool,
        /// Restart the process after unsolicited exits
        #[arg(long)]
        auto_restart: bool,
        /// Cap on automatic restarts
        #[arg(long, default_value_t = 0)]
        max_restarts: u32,
        /// Run the child as this user
        #[arg(long)]
        user: Option<String>,
        /// Run the child with this group
        #[arg(long)]
        group: Option<String>,
    },
    /// Stop a process by id or name
    Stop {
        /// Process id or name
        target: String,
    },
    /// Restart a process by id or name
    Restart {
        /// Process id or name
        target: String,
    },
    /// Delete a process by id or name
    Delete {
        /// Process id or name
        target: String,
    },
    /// Show detailed status for one process, or stats for all running ones
    Status {
        /// Process id or name; omit for a resource table of every running process
        target: Option<String>,
    },
    /// Tail a process's captured output
    Logs {
        /// Process id or name
        target: String,
        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 100)]
        lines: usize,
        /// Stream to read: stdout or stderr (default: combined)
        #[arg(long = "type")]
        kind: Option<String>,
    },
    /// Show daemon and host statistics
    System,
}

fn parse_env(pairs: &[String]) -> Result<HashMap<String, String>, cli::CliError> {
    let mut env = HashMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(cli::CliError::InvalidArgument(format!(
                "environment entry '{pair}' is not KEY=VALUE"
            )));
        };
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = Client::new(&cli.host, cli.port, cli.token.clone());

    let result = run(&cli.command, &client).await;
    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: &Commands, client: &Client) -> cli::Result<()> {
    match command {
        Commands::List => {
            let processes = client.list().await?;
            if processes.is_empty() {
                println!("No processes");
            } else {
                print!("{}", format_process_table(&processes));
            }
        }
        Commands::Start {
            name,
            command,
            args,
            workdir,
            env,
            auto_start,
            auto_restart,
            max_restarts,
            user,
            group,
        } => {
            let request = StartRequest {
                name: name.clone(),
                command: command.clone(),
                args: args.clone(),
                work_dir: workdir.clone(),
                env: parse_env(env)?,
                auto_start: *auto_start,
                auto_restart: *auto_restart,
                max_restarts: *max_restarts,
                user: user.clone(),
                group: group.clone(),
            };
            let info = client.start(&request).await?;
            println!("✓ Started '{}' (id {})", info.name, info.id);
        }
        Commands::Stop { target } => {
            let message = client.stop(target).await?;
            println!("✓ {message}");
        }
        Commands::Restart { target } => {
            let message = client.restart(target).await?;
            println!("✓ {message}");
        }
        Commands::Delete { target } => {
            let message = client.delete(target).await?;
            println!("✓ {message}");
        }
        Commands::Status { target: None } => {
            let stats = client.all_stats().await?;
            if stats.is_empty() {
                println!("No running processes");
            } else {
                print!("{}", cli::format_stats_table(&stats));
            }
        }
        Commands::Status {
            target: Some(target),
        } => {
            let info = client.get_process(target).await?;
            println!("Process {} ({})", info.name, info.id);
            println!("  Status:    {}", info.status);
            if let Some(pid) = info.pid {
                println!("  PID:       {pid}");
            }
            println!("  Command:   {} {}", info.command, info.args.join(" "));
            if let Some(uptime) = info.uptime {
                println!("  Uptime:    {}", cli::format_duration(uptime));
            }
            println!("  Restarts:  {}/{}", info.restart_count, info.max_restarts);
            if let Some(cpu) = info.cpu {
                println!("  CPU:       {cpu:.1}%");
            }
            if let Some(memory) = info.memory {
                println!("  Memory:    {}", cli::format_bytes(memory));
            }
        }
        Commands::Logs {
            target,
            lines,
            kind,
        } => {
            let logs = client.logs(target, *lines, kind.as_deref()).await?;
            for line in logs {
                println!("{line}");
            }
        }
        Commands::System => {
            let system = client.system().await?;
            println!("{}", serde_json::to_string_pretty(&system).unwrap_or_default());
        }
    }
    Ok(())
}
