use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use tpa_core::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "tpa-api",
    about = "Serve and exercise the TPA claims and pre-authorization adjudication core",
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
    /// Run one policy and pre-authorization expiry sweep against the seeded store
    Sweep(SweepArgs),
    /// Walk eligibility, claim, and pre-authorization lifecycles against seeded data
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct SweepArgs {
    /// Date the sweep treats as today (YYYY-MM-DD). Defaults to the local date.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) today: Option<chrono::NaiveDate>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Sweep(args) => server::sweep_once(args),
        Command::Demo(args) => run_demo(args),
    }
}
