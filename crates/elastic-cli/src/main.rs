//! Elastic circuit compiler CLI.
//!
//! Provides the `elastic` binary. Every subcommand reads a circuit graph
//! from a JSON file, runs one pass (or the whole pipeline) and writes the
//! graph back, by default over the input. Reports go to stdout as JSON,
//! logs to stderr.
//!
//! Exit codes: 0 = success, 1 = structural error, 2 = configuration error,
//! 3 = infeasible, 4 = region legality error, 5 = internal consistency error.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use elastic_analysis::analyze;
use elastic_buffers::{
    insert_buffer_unchecked, insert_buffers_unchecked, parse_requests, place_buffers,
    BufferError, PlacementAlgorithm,
};
use elastic_core::{BufferTiming, CircuitGraph};
use elastic_driver::{
    load_graph, load_options, read_text, run, save_graph, PipelineError, PipelineOptions,
};
use elastic_speculation::{
    annotate_regions, insert_speculation, ChannelRef, PositionList, SpeculationError,
    SpeculationMode,
};

/// Buffer placement and speculation for handshake circuits.
#[derive(Parser)]
#[command(name = "elastic", about = "Buffer placement and speculation for handshake circuits")]
struct Cli {
    /// JSON options file. Flags override its values.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Input and output graph files.
#[derive(Args)]
struct GraphFiles {
    /// Circuit graph JSON.
    input: PathBuf,

    /// Where to write the resulting graph (default: overwrite the input).
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl GraphFiles {
    fn destination(&self) -> &Path {
        self.output.as_deref().unwrap_or(&self.input)
    }
}

#[derive(Args)]
struct TimingArgs {
    /// Target clock period, in delay units.
    #[arg(long)]
    clock_period: Option<f64>,

    /// Required tokens per cycle on every loop, in (0, 1].
    #[arg(long)]
    target_throughput: Option<f64>,
}

#[derive(Args)]
struct PlacementArgs {
    /// Placement algorithm: milp or on_merges.
    #[arg(long)]
    algorithm: Option<PlacementAlgorithm>,

    /// Slot limit for channels without their own maximum.
    #[arg(long)]
    slot_cap: Option<u32>,

    /// Solver node budget per solve.
    #[arg(long)]
    max_nodes: Option<u64>,

    /// Solver wall-clock budget per solve, in milliseconds.
    #[arg(long)]
    time_limit_ms: Option<u64>,

    /// Remove existing buffers before placing.
    #[arg(long)]
    strip_existing: bool,
}

#[derive(Args)]
struct SpeculationArgs {
    /// Automatic mode: the speculator channel as `op:port`.
    #[arg(long, conflicts_with = "positions")]
    speculator: Option<ChannelRef>,

    /// Explicit mode: a JSON position list.
    #[arg(long)]
    positions: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run the whole pipeline: analyze, place buffers, speculate, annotate.
    Run {
        #[command(flatten)]
        files: GraphFiles,
        #[command(flatten)]
        timing: TimingArgs,
        #[command(flatten)]
        placement: PlacementArgs,
        #[command(flatten)]
        speculation: SpeculationArgs,
        /// Skip the region annotator.
        #[arg(long)]
        no_annotate: bool,
    },

    /// Report cycles and delay estimates without changing the graph.
    Analyze {
        /// Circuit graph JSON.
        input: PathBuf,
        #[command(flatten)]
        timing: TimingArgs,
        /// Write the delay estimates onto the channels of this file.
        #[arg(long)]
        write_delays: Option<PathBuf>,
    },

    /// Place buffers on the circuit.
    PlaceBuffers {
        #[command(flatten)]
        files: GraphFiles,
        #[command(flatten)]
        timing: TimingArgs,
        #[command(flatten)]
        placement: PlacementArgs,
    },

    /// Insert one buffer (or a JSON list of them) with no cycle or timing
    /// checks. For prototyping only.
    InsertBuffer {
        #[command(flatten)]
        files: GraphFiles,
        /// Producer operation name.
        #[arg(long, required_unless_present = "requests")]
        op: Option<String>,
        /// Producer output index.
        #[arg(long, default_value = "0")]
        port: u16,
        #[arg(long, default_value = "1")]
        slots: u32,
        /// opaque or transparent.
        #[arg(long, default_value = "opaque")]
        timing: BufferTiming,
        /// JSON list of buffer requests applied as one batch.
        #[arg(long, conflicts_with = "op")]
        requests: Option<PathBuf>,
    },

    /// Insert speculator, save and commit units.
    Speculate {
        #[command(flatten)]
        files: GraphFiles,
        #[command(flatten)]
        speculation: SpeculationArgs,
        /// Skip the region annotator.
        #[arg(long)]
        no_annotate: bool,
    },

    /// Recompute speculative region markers.
    Annotate {
        #[command(flatten)]
        files: GraphFiles,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let exit_code = match execute(cli) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error ({}): {}", e.kind(), e);
            e.exit_code()
        }
    };
    process::exit(exit_code);
}

fn execute(cli: Cli) -> Result<(), PipelineError> {
    let mut options = match &cli.config {
        Some(path) => load_options(path)?,
        None => PipelineOptions::default(),
    };

    match cli.command {
        Commands::Run {
            files,
            timing,
            placement,
            speculation,
            no_annotate,
        } => {
            apply_timing(&mut options, &timing);
            apply_placement(&mut options, &placement);
            if let Some(mode) = speculation_mode(&speculation)? {
                options.speculation = Some(mode);
            }
            if no_annotate {
                options.annotate = false;
            }
            let mut graph = load_graph(&files.input)?;
            let report = run(&mut graph, &options)?;
            finish(&graph, &files, &report)
        }
        Commands::Analyze {
            input,
            timing,
            write_delays,
        } => {
            apply_timing(&mut options, &timing);
            let mut graph = load_graph(&input)?;
            let report = analyze(&graph, &options.timing)?;
            print_json(&report.summary());
            if let Some(path) = write_delays {
                report.write_back(&mut graph)?;
                save_graph(&graph, &path)?;
                info!(path = %path.display(), "wrote delay estimates");
            }
            Ok(())
        }
        Commands::PlaceBuffers {
            files,
            timing,
            placement,
        } => {
            apply_timing(&mut options, &timing);
            apply_placement(&mut options, &placement);
            let mut graph = load_graph(&files.input)?;
            let report = place_buffers(&mut graph, &options.timing, &options.placement)?;
            finish(&graph, &files, &report)
        }
        Commands::InsertBuffer {
            files,
            op,
            port,
            slots,
            timing,
            requests,
        } => {
            let mut graph = load_graph(&files.input)?;
            let inserted = match (requests, op) {
                (Some(path), _) => {
                    let requests = parse_requests(&read_text(&path)?)?;
                    insert_buffers_unchecked(&mut graph, &requests)?
                }
                (None, Some(op)) => vec![insert_buffer_unchecked(
                    &mut graph, &op, port, slots, timing,
                )?],
                (None, None) => {
                    return Err(
                        BufferError::Config("insert-buffer needs --op or --requests".into()).into(),
                    );
                }
            };
            let names: Vec<&str> = inserted
                .iter()
                .filter_map(|&id| graph.operation(id).map(|o| o.name.as_str()))
                .collect();
            finish(&graph, &files, &names)
        }
        Commands::Speculate {
            files,
            speculation,
            no_annotate,
        } => {
            let mode = match speculation_mode(&speculation)? {
                Some(mode) => mode,
                None => options.speculation.clone().ok_or_else(|| {
                    SpeculationError::Malformed(
                        "no speculator given; pass --speculator or --positions".into(),
                    )
                })?,
            };
            let mut graph = load_graph(&files.input)?;
            let report = insert_speculation(&mut graph, &mode)?;
            if !no_annotate {
                annotate_regions(&mut graph)?;
            }
            finish(&graph, &files, &report)
        }
        Commands::Annotate { files } => {
            let mut graph = load_graph(&files.input)?;
            let report = annotate_regions(&mut graph)?;
            finish(&graph, &files, &report)
        }
    }
}

fn apply_timing(options: &mut PipelineOptions, args: &TimingArgs) {
    if let Some(period) = args.clock_period {
        options.timing.clock_period = period;
    }
    if let Some(target) = args.target_throughput {
        options.timing.target_throughput = target;
    }
}

fn apply_placement(options: &mut PipelineOptions, args: &PlacementArgs) {
    let placement = &mut options.placement;
    if let Some(algorithm) = args.algorithm {
        placement.algorithm = algorithm;
    }
    if let Some(cap) = args.slot_cap {
        placement.slot_cap = cap;
    }
    if let Some(nodes) = args.max_nodes {
        placement.max_nodes = nodes;
    }
    if args.time_limit_ms.is_some() {
        placement.time_limit_ms = args.time_limit_ms;
    }
    if args.strip_existing {
        placement.strip_existing = true;
    }
}

fn speculation_mode(args: &SpeculationArgs) -> Result<Option<SpeculationMode>, PipelineError> {
    if let Some(path) = &args.positions {
        let positions = PositionList::from_json(&read_text(path)?)?;
        return Ok(Some(SpeculationMode::Explicit(positions)));
    }
    Ok(args
        .speculator
        .clone()
        .map(|speculator| SpeculationMode::Automatic { speculator }))
}

/// Saves the graph and prints the pass report.
fn finish<R: Serialize>(
    graph: &CircuitGraph,
    files: &GraphFiles,
    report: &R,
) -> Result<(), PipelineError> {
    let destination = files.destination();
    save_graph(graph, destination)?;
    info!(path = %destination.display(), "wrote circuit graph");
    print_json(report);
    Ok(())
}

fn print_json<R: Serialize>(report: &R) {
    let json = serde_json::to_string_pretty(report)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize report: {}\"}}", e));
    println!("{}", json);
}
