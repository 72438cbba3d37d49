use clap::Parser;
use coupler::component::Io;
use coupler::config;
use coupler::output;
use coupler::GetOpts;
use std::io;

/// Run a coupled model and print its values
#[derive(Parser)]
#[command(name = "coupler", version)]
struct Cli {
    /// TOML model file
    model: String,

    /// Also print input values
    #[arg(long)]
    inputs: bool,

    /// Record a case with this name after the run
    #[arg(long)]
    record: Option<String>,

    /// Print performance stats to stderr
    #[arg(long)]
    stats: bool,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut stats = if cli.stats { Some(coupler::stats::Stats::new()) } else { None };

    #[cfg(feature = "distributed")]
    let _universe = mpi::initialize().unwrap_or_else(|| {
        eprintln!("MPI initialization failed");
        std::process::exit(1);
    });
    #[cfg(feature = "distributed")]
    let loaded = config::load_problem_with(&cli.model, coupler::solver::comm_mpi::MpiComm::new());
    #[cfg(not(feature = "distributed"))]
    let loaded = config::load_problem(&cli.model);

    let mut problem = loaded.unwrap_or_else(|e| {
        eprintln!("Error loading {}: {}", cli.model, e);
        std::process::exit(1);
    });

    problem.run_model_with(stats.as_mut()).unwrap_or_else(|e| {
        eprintln!("Run error: {}", e);
        std::process::exit(1);
    });

    if let Some(case) = &cli.record {
        problem.record(case).unwrap_or_else(|e| {
            eprintln!("Recording error: {}", e);
            std::process::exit(1);
        });
    }

    let model = problem.model().unwrap_or_else(|e| {
        eprintln!("{}", e);
        std::process::exit(1);
    });
    let mut names: Vec<&str> = model.var_names(Io::Output);
    if cli.inputs {
        names.extend(model.var_names(Io::Input));
    }
    let names: Vec<String> = names
        .into_iter()
        .filter(|n| !n.starts_with(coupler::model::AUTO_IVC))
        .map(str::to_string)
        .collect();

    let opts = GetOpts::remote().with_from_src(false);
    let values: Vec<(String, Vec<f64>)> = names
        .into_iter()
        .map(|name| {
            let val = problem.get_val_with(&name, &opts).unwrap_or_else(|e| {
                eprintln!("Error reading {}: {}", name, e);
                std::process::exit(1);
            });
            (name, val)
        })
        .collect();

    if problem.comm().rank() == 0 {
        let mut stdout = io::stdout();
        output::write_values_csv(&values, &mut stdout).unwrap_or_else(|e| {
            eprintln!("Output error: {}", e);
            std::process::exit(1);
        });
    }

    problem.cleanup().unwrap_or_else(|e| {
        eprintln!("Cleanup error: {}", e);
        std::process::exit(1);
    });

    if let Some(ref stats) = stats {
        stats.display();
    }
}
