use clap::Parser;
use std::path::{Path, PathBuf};
use std::process;

use phc::artifact::{PhasorArtifact, TrajectoryArtifact};
use phc::ir::{LengthTable, ParamTable, Program};
use phc::pass::PassId;
use phc::pipeline::{compute_provenance, run_pipeline, CompilationState, PipelineOptions};
use phc::simulate::{simulate, SimulationConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    Expanded,
    Phasor,
    Trajectory,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "phc",
    version,
    about = "Phasor Compiler — compiles loop/assignment IR into a guarded affine phasor system"
)]
struct Cli {
    /// Input IR (JSON), or a phasor artifact with --from-artifact
    input: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Phasor)]
    emit: EmitStage,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Parameter table: JSON object of name → number
    #[arg(long)]
    params: Option<PathBuf>,

    /// Set a parameter (repeatable, overrides --params)
    #[arg(short = 'D', value_name = "NAME=VALUE", value_parser = parse_param)]
    define: Vec<(String, f64)>,

    /// Set a loop length (repeatable)
    #[arg(short = 'L', value_name = "NAME=LEN", value_parser = parse_length)]
    length: Vec<(String, i64)>,

    /// Simulation step budget
    #[arg(long, default_value_t = 1000)]
    max_steps: usize,

    /// Treat the input as a phasor artifact and skip the build
    #[arg(long)]
    from_artifact: bool,

    /// Omit non-affine guards with a warning instead of failing
    #[arg(long)]
    allow_unsupported_guards: bool,

    /// Build blocks sequentially
    #[arg(long)]
    no_parallel: bool,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn parse_param(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{s}`"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for `{name}`: {e}"))?;
    Ok((name.trim().to_string(), value))
}

fn parse_length(s: &str) -> Result<(String, i64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=LEN, got `{s}`"))?;
    let value: i64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid length for `{name}`: {e}"))?;
    Ok((name.trim().to_string(), value))
}

fn fail_io(msg: impl std::fmt::Display) -> ! {
    eprintln!("phc: error: {}", msg);
    process::exit(2);
}

fn read_file(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_else(|e| fail_io(format!("{}: {}", path.display(), e)))
}

fn write_output(path: Option<&Path>, text: &str) {
    match path {
        Some(p) => {
            if let Err(e) = std::fs::write(p, text) {
                fail_io(format!("{}: {}", p.display(), e));
            }
        }
        None => print!("{}", text),
    }
}

fn ensure_newline(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "phc=debug" } else { "phc=warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(input = %cli.input.display(), emit = ?cli.emit, "starting");

    let sim_config = SimulationConfig {
        max_steps: cli.max_steps,
        ..SimulationConfig::default()
    };
    let input = read_file(&cli.input);

    // ── Pre-built artifact ──
    if cli.from_artifact {
        let system = PhasorArtifact::from_json(&input)
            .map_err(|e| e.to_string())
            .and_then(|a| a.into_system().map_err(|e| e.to_string()))
            .unwrap_or_else(|e| fail_io(format!("{}: {}", cli.input.display(), e)));
        let text = match cli.emit {
            EmitStage::Trajectory => {
                let trajectory = simulate(&system, &sim_config).unwrap_or_else(|e| {
                    eprintln!("phc: error: {}", e);
                    process::exit(1);
                });
                TrajectoryArtifact::from(&trajectory).to_json()
            }
            EmitStage::Phasor => PhasorArtifact::from_system(&system, None).to_json(),
            EmitStage::Expanded | EmitStage::BuildInfo => {
                fail_io("--from-artifact supports only --emit phasor or --emit trajectory")
            }
        };
        let text = text.unwrap_or_else(|e| fail_io(e));
        write_output(cli.output.as_deref(), &ensure_newline(text));
        return;
    }

    // ── Load IR and tables ──
    let program = Program::from_json(&input)
        .unwrap_or_else(|e| fail_io(format!("{}: {}", cli.input.display(), e)));

    let mut params: ParamTable = match &cli.params {
        Some(path) => serde_json::from_str(&read_file(path))
            .unwrap_or_else(|e| fail_io(format!("{}: {}", path.display(), e))),
        None => ParamTable::new(),
    };
    for (name, value) in &cli.define {
        params.insert(name.clone(), *value);
    }
    let lengths: LengthTable = cli.length.iter().cloned().collect();

    tracing::debug!(
        nodes = program.body.len(),
        params = params.len(),
        lengths = lengths.len(),
        "loaded input"
    );

    if cli.emit == EmitStage::BuildInfo {
        let provenance = compute_provenance(&program, &params, &lengths);
        write_output(cli.output.as_deref(), &provenance.to_json());
        return;
    }

    // ── Run pipeline ──
    let terminal = match cli.emit {
        EmitStage::Expanded => PassId::Expand,
        EmitStage::Phasor => PassId::BuildGuards,
        EmitStage::Trajectory | EmitStage::BuildInfo => PassId::Simulate,
    };
    let options = PipelineOptions {
        allow_unsupported_guards: cli.allow_unsupported_guards,
        parallel: !cli.no_parallel,
    };
    let mut state = CompilationState::new(program, params, lengths);
    let result = run_pipeline(&mut state, terminal, &options, &sim_config, |_, diags| {
        for diag in diags {
            eprintln!("phc: {}", diag);
        }
    });
    if let Err(err) = result {
        tracing::debug!(pass = %err.failing_pass, "pipeline stopped");
        process::exit(1);
    }

    let text = match cli.emit {
        EmitStage::Expanded => serde_json::to_string_pretty(&state.expansion),
        EmitStage::Phasor => match &state.phasor {
            Some(system) => PhasorArtifact::from_system(system, state.provenance.as_ref()).to_json(),
            None => fail_io("phasor system was not produced"),
        },
        EmitStage::Trajectory => match &state.trajectory {
            Some(trajectory) => TrajectoryArtifact::from(trajectory).to_json(),
            None => fail_io("trajectory was not produced"),
        },
        EmitStage::BuildInfo => return,
    };
    let text = text.unwrap_or_else(|e| fail_io(e));
    write_output(cli.output.as_deref(), &ensure_newline(text));
}
