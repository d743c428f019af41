use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use replica_ledger::application::node::NodeAgent;
use replica_ledger::application::simulation::{Simulation, Submission};
use replica_ledger::config::{PolicyKind, SimulationConfig};
use replica_ledger::domain::ports::{OrderingPolicyBox, PeerId};
use replica_ledger::infrastructure::channel::{ChannelNetwork, scale_ticks};
use replica_ledger::interfaces::csv::account_writer::AccountWriter;
use replica_ledger::interfaces::csv::workload_reader::WorkloadReader;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Seeded discrete-event simulation.
    Sim,
    /// One tokio task per node.
    Channel,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Workload CSV file (`at,node,to,amount,type`)
    input: PathBuf,

    /// JSON configuration file. Flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    policy: Option<PolicyKind>,

    #[arg(long)]
    nodes: Option<usize>,

    /// Upper bound on ticks spent waiting for the network to drain
    #[arg(long)]
    steps: Option<u64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Finality delay for the latency policy, in ticks
    #[arg(long)]
    delta: Option<u64>,

    #[arg(long)]
    latency: Option<u64>,

    #[arg(long)]
    jitter: Option<u64>,

    /// Packet loss probability (0.0 - 1.0)
    #[arg(long)]
    loss: Option<f64>,

    #[arg(long, value_enum, default_value = "sim")]
    transport: Transport,

    /// Wall-clock length of one tick for the channel transport
    #[arg(long, default_value_t = 5)]
    tick_ms: u64,
}

impl Cli {
    fn simulation_config(&self) -> Result<SimulationConfig> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::load(path).into_diagnostic()?,
            None => SimulationConfig::default(),
        };
        if let Some(policy) = self.policy {
            config.policy.kind = policy;
        }
        if let Some(nodes) = self.nodes {
            config.nodes = nodes;
        }
        if let Some(steps) = self.steps {
            config.max_steps = steps;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(delta) = self.delta {
            config.policy.delta = delta;
        }
        if let Some(latency) = self.latency {
            config.network.latency = latency;
        }
        if let Some(jitter) = self.jitter {
            config.network.jitter = jitter;
        }
        if let Some(loss) = self.loss {
            config.network.packet_loss_rate = loss;
        }
        config.validate().into_diagnostic()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.simulation_config()?;

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = WorkloadReader::new(file);
    let mut workload = Vec::new();
    for submission in reader.submissions() {
        match submission {
            Ok(submission) => workload.push(submission),
            Err(e) => eprintln!("Error reading workload entry: {}", e),
        }
    }

    let simulation = Simulation::from_config(&config).into_diagnostic()?;
    let nodes = match cli.transport {
        Transport::Sim => run_simulated(simulation, workload, config.max_steps)?,
        Transport::Channel => {
            let tick = Duration::from_millis(cli.tick_ms.max(1));
            run_channel(simulation, workload, &config, tick).await?
        }
    };

    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    writer.write_nodes(&nodes).into_diagnostic()?;

    Ok(())
}

fn run_simulated(
    mut simulation: Simulation<OrderingPolicyBox>,
    workload: Vec<Submission>,
    max_steps: u64,
) -> Result<Vec<NodeAgent<OrderingPolicyBox>>> {
    let summary = simulation
        .run_workload(workload, max_steps)
        .into_diagnostic()?;
    info!(
        steps = summary.steps,
        sent = summary.stats.messages_sent,
        dropped = summary.stats.messages_dropped,
        "simulation finished"
    );
    if !summary.quiescent {
        eprintln!(
            "Network did not settle within {} steps; {} node(s) stalled",
            max_steps,
            summary.stalled.len()
        );
    }
    if !summary.converged {
        eprintln!("Nodes hold diverging balances");
    }
    Ok(simulation.into_parts().0)
}

async fn run_channel(
    simulation: Simulation<OrderingPolicyBox>,
    mut workload: Vec<Submission>,
    config: &SimulationConfig,
    tick: Duration,
) -> Result<Vec<NodeAgent<OrderingPolicyBox>>> {
    let (nodes, topology) = simulation.into_parts();
    let addresses: Vec<_> = nodes.iter().map(|node| node.address()).collect();
    let links: Vec<Vec<PeerId>> = (0..nodes.len()).map(|p| topology.peers_of(p)).collect();
    let network = ChannelNetwork::spawn(
        nodes,
        links,
        config.network.clone(),
        tick,
        config.seed,
    )
    .into_diagnostic()?;

    workload.sort_by_key(|s| s.at);
    let start = tokio::time::Instant::now();
    for submission in workload {
        let Some(to) = addresses.get(submission.to).copied() else {
            eprintln!(
                "Skipping submission at tick {}: unknown node {}",
                submission.at, submission.to
            );
            continue;
        };
        let at = scale_ticks(tick, submission.at);
        tokio::time::sleep(at.saturating_sub(start.elapsed())).await;
        match network
            .issue(submission.node, to, submission.amount, submission.r#type)
            .await
        {
            Ok(outcome) => debug!(node = submission.node, ?outcome, "submitted"),
            Err(e) => eprintln!("Error submitting workload entry: {}", e),
        }
    }

    let timeout = scale_ticks(tick, config.max_steps);
    let quiescent = network
        .wait_until_quiescent(timeout, tick)
        .await
        .into_diagnostic()?;
    let converged = network.converged().await.into_diagnostic()?;
    info!(
        quiescent,
        converged,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "channel run finished"
    );
    if !quiescent {
        eprintln!(
            "Network did not settle within {} steps",
            config.max_steps
        );
    }
    if !converged {
        warn!("nodes hold diverging balances");
        eprintln!("Nodes hold diverging balances");
    }
    network.shutdown().await.into_diagnostic()
}
