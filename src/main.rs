use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, LevelFilter};
use quasim::checkpoint::{read_metadata, save_checkpoint, save_compressed};
use quasim::circuit::Circuit;
use quasim::compression::StateCompressor;
use quasim::config::SimConfig;
use quasim::distribute::{shard_all, DistContext, MeshShape};
use quasim::noise::{run_trajectories, NoiseEngine, NoiseSpec};
use quasim::runtime::{expectation_z, DenseStateEngine, InitialState, QuantumState};
use quasim::simulate::{run, SimulationRequest};
use serde_json::to_writer_pretty;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

const QUASIM_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "quasim", version = QUASIM_VERSION,
    about = "quasim - state-vector, tensor-network and noisy quantum circuit simulator.\n\
             Use 'quasim help <command>' for more information on a specific command.",
    long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG still wins when set).
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Copy, Default)]
struct NoiseArgs {
    /// Amplitude damping strength per qubit.
    #[arg(long, default_value_t = 0.0)]
    gamma1: f64,
    /// Phase damping strength per qubit.
    #[arg(long, default_value_t = 0.0)]
    gamma_phi: f64,
    /// Depolarizing probability per qubit.
    #[arg(long, default_value_t = 0.0)]
    depol: f64,
}

impl NoiseArgs {
    fn spec(&self) -> NoiseSpec {
        NoiseSpec {
            gamma1: self.gamma1,
            gamma_phi: self.gamma_phi,
            p_depol: self.depol,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Simulates a circuit and prints the result as JSON.
    Run {
        /// Circuit file (text or JSON).
        circuit: PathBuf,
        /// JSON configuration file; missing fields take their defaults.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Start from a random state with this seed instead of |0...0⟩.
        #[arg(long)]
        random_state: Option<u64>,
        #[command(flatten)]
        noise: NoiseArgs,
        /// Write the result here instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Also write a sharded checkpoint of the final state to this directory.
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// Number of shards in the checkpoint.
        #[arg(long, default_value_t = 1)]
        world_size: u32,
    },
    /// Simulates a circuit and compresses the final state to an MPS.
    Compress {
        circuit: PathBuf,
        /// Minimum fidelity of the decompressed state.
        #[arg(long, default_value_t = 0.99)]
        fidelity: f64,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write a compressed checkpoint to this directory.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Averages <Z> over Monte Carlo noise trajectories of a circuit's final state.
    Trajectories {
        circuit: PathBuf,
        #[arg(long, default_value_t = 1000)]
        count: usize,
        /// Qubit whose <Z> is averaged.
        #[arg(long, default_value_t = 0)]
        qubit: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[command(flatten)]
        noise: NoiseArgs,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Worker threads (defaults to the number of logical cores).
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Prints a checkpoint's metadata sidecar.
    Inspect { dir: PathBuf },
    /// Prints the quasim version.
    Version,
}

fn load_config(path: Option<&Path>) -> Result<SimConfig, String> {
    match path {
        Some(p) => SimConfig::from_json_file(p).map_err(|e| format!("error reading config {}: {}", p.display(), e)),
        None => Ok(SimConfig::default()),
    }
}

fn load_circuit(path: &Path) -> Result<Circuit, String> {
    Circuit::load(path).map_err(|e| format!("error reading circuit {}: {}", path.display(), e))
}

// runs the circuit on the dense engine, for commands that need a pure state
fn final_state(config: &SimConfig, circuit: &Circuit) -> Result<QuantumState, String> {
    let engine = DenseStateEngine::new(config.clone()).map_err(|e| e.to_string())?;
    let mut state = engine
        .initialize(circuit.num_qubits, &InitialState::Zero)
        .map_err(|e| e.to_string())?;
    engine.apply_circuit(&mut state, circuit).map_err(|e| e.to_string())?;
    Ok(state)
}

fn write_json<T: serde::Serialize>(value: &T, output: Option<&Path>) -> Result<(), String> {
    match output {
        Some(path) => {
            let file = File::create(path).map_err(|e| format!("error creating {}: {}", path.display(), e))?;
            to_writer_pretty(file, value).map_err(|e| e.to_string())
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            to_writer_pretty(&mut handle, value).map_err(|e| e.to_string())?;
            writeln!(handle).map_err(|e| e.to_string())
        }
    }
}

fn init_logging(debug: bool) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(if debug { LevelFilter::Debug } else { LevelFilter::Info });
    // RUST_LOG overrides the flag
    builder.parse_default_env();
    builder.init();
}

fn main() -> Result<(), String> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Commands::Run {
            circuit,
            config,
            random_state,
            noise,
            output,
            checkpoint,
            world_size,
        } => {
            let config = load_config(config.as_deref())?;
            let circuit = load_circuit(&circuit)?;
            let initial_state = match random_state {
                Some(seed) => InitialState::Random { seed },
                None => InitialState::Zero,
            };
            let spec = noise.spec();
            let request = SimulationRequest {
                circuit,
                initial_state,
                noise: if spec.is_noiseless() { None } else { Some(spec) },
                config: config.clone(),
            };
            let start = Instant::now();
            let result = run(&request).map_err(|e| format!("simulation failed: {}", e))?;
            info!("simulation finished in {:.3?}", start.elapsed());

            if let Some(dir) = checkpoint {
                let amplitudes = quasim::complex_vector::ComplexVector::from_vec(result.state_vector.clone());
                let mut state = QuantumState::from_vector(amplitudes, config.seed).map_err(|e| e.to_string())?;
                state.precision = result.metadata.precision;
                let mesh = MeshShape::new(world_size, 1);
                let contexts = DistContext::mesh(mesh, config.seed).map_err(|e| e.to_string())?;
                let shards = shard_all(&state, world_size).map_err(|e| e.to_string())?;
                for (ctx, shard) in contexts.iter().zip(&shards) {
                    save_checkpoint(ctx, shard, &dir).map_err(|e| format!("checkpoint failed: {}", e))?;
                }
            }
            write_json(&result, output.as_deref())?;
        }
        Commands::Compress {
            circuit,
            fidelity,
            config,
            output,
        } => {
            let config = load_config(config.as_deref())?;
            let circuit = load_circuit(&circuit)?;
            let state = final_state(&config, &circuit)?;
            let compressed = StateCompressor::from_config(&config)
                .compress_state(&state, fidelity)
                .map_err(|e| format!("compression failed: {}", e))?;
            println!(
                "fidelity {:.9}, compression ratio {:.4}, bond dimensions {:?}",
                compressed.fidelity_achieved,
                compressed.compression_ratio,
                compressed.mps.bond_dims()
            );
            if let Some(dir) = output {
                save_compressed(&compressed, &dir).map_err(|e| format!("checkpoint failed: {}", e))?;
                println!("saved compressed state to '{}'", dir.display());
            }
        }
        Commands::Trajectories {
            circuit,
            count,
            qubit,
            seed,
            noise,
            config,
            threads,
        } => {
            let config = load_config(config.as_deref())?;
            let circuit = load_circuit(&circuit)?;
            let state = final_state(&config, &circuit)?;
            if qubit >= state.num_qubits as usize {
                return Err(format!("qubit {} out of range for {} qubits", qubit, state.num_qubits));
            }
            let engine = NoiseEngine::new(config).map_err(|e| e.to_string())?;

            let progress_bar = ProgressBar::new(count as u64);
            progress_bar.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} (est. time left: {eta_precise}) {msg}")
                    .map_err(|e| e.to_string())?
                    .progress_chars("##->"),
            );
            progress_bar.set_message("running trajectories...");
            let thread_count = threads.unwrap_or_else(num_cpus::get);
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(thread_count)
                .build()
                .map_err(|e| e.to_string())?;
            info!("running {} trajectories on {} threads", count, thread_count);
            let stats = pool
                .install(|| {
                    run_trajectories(
                        &engine,
                        &state,
                        &noise.spec(),
                        count,
                        seed,
                        |s| expectation_z(s, qubit).unwrap_or(0.0),
                        || progress_bar.inc(1),
                    )
                })
                .map_err(|e| format!("trajectories failed: {}", e))?;
            progress_bar.finish_with_message("done");
            println!(
                "<Z{}> = {:.6} ± {:.6} over {} trajectories",
                qubit,
                stats.mean,
                stats.standard_error(),
                stats.trajectories
            );
        }
        Commands::Inspect { dir } => {
            let metadata = read_metadata(&dir).map_err(|e| format!("error reading {}: {}", dir.display(), e))?;
            write_json(&metadata, None)?;
        }
        Commands::Version => {
            println!("quasim version {}", QUASIM_VERSION);
        }
    }
    Ok(())
}
