use clap::Parser;
use console::style;
use tessen::recipe::{self, Layout};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Build orchestrator for front-end web apps.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Task or serve target to run.
    #[arg(index = 1, default_value = "default")]
    task: String,

    /// Port of the development server, overriding the serve target's.
    #[arg(long)]
    port: Option<u16>,

    /// Print the task graph as a Mermaid diagram and exit.
    #[arg(long)]
    graph: bool,
}

fn init_logging() {
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();

    let graph = recipe::webapp(&Layout::default())?;

    if args.graph {
        println!("{graph}");
        return Ok(());
    }

    eprintln!(
        "{} {}",
        style("tessen").bold().magenta(),
        style(&args.task).yellow()
    );

    if graph.serve_target(&args.task).is_some() {
        graph.serve(&args.task, args.port)?;
    } else {
        let diagnostics = graph.run(&args.task)?;
        eprintln!("{diagnostics}");
    }

    Ok(())
}
