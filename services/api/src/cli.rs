use crate::demo::{run_demo, run_scheduler_once, DemoArgs, SchedulerRunArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use leasekeeper::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "leasekeeper",
    about = "Run the tenancy request, rent cycle and auto-payment service",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Walk a request from bid to paid rent against in-memory storage
    Demo(DemoArgs),
    /// Operate the auto-payment scheduler by hand
    Scheduler {
        #[command(subcommand)]
        command: SchedulerCommand,
    },
}

#[derive(Subcommand, Debug)]
enum SchedulerCommand {
    /// Run a single collection pass over a seeded demo portfolio and print the report
    RunOnce(SchedulerRunArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Do not start the background auto-payment task
    #[arg(long)]
    pub(crate) no_scheduler: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args),
        Command::Scheduler {
            command: SchedulerCommand::RunOnce(args),
        } => run_scheduler_once(args),
    }
}
