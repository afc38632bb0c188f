use broker_sim::analytics::{self, AnalysisReport, TandemParams};
use broker_sim::config::{self, AnalysisTarget, Command, FormatArg, ModelCommand};
use broker_sim::distributions::families;
use broker_sim::engine;
use broker_sim::error::Result;
use broker_sim::logging;
use broker_sim::models::ExperimentConfig;
use broker_sim::output::{Formatter, HumanFormatter, JsonFormatter, SummaryFormatter};
use broker_sim::tail;
use broker_sim::tandem;

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = config::parse_args()?;
    logging::init_logging(&args.log_level);
    let formatter = formatter_for(&args.format);

    let output = match args.command {
        Command::Single(single) => {
            let config = config::build_single(&single)?;
            formatter.run(&engine::run_single_stage(&config)?.summary())?
        }
        Command::Tandem(tandem_args) => {
            let config = config::build_tandem(&tandem_args)?;
            formatter.run(&tandem::run_tandem(&config)?.summary())?
        }
        Command::Analyze(analyze) => {
            let (target, methods) = config::build_analysis(&analyze)?;
            formatter.analysis(&analyze_target(&target, &methods)?)?
        }
        Command::Tail(tail_args) => {
            let samples = config::load_samples(&tail_args.input)?;
            let report = tail::analyze_tail(
                &samples,
                tail_args.percentile,
                &tail_args.bootstrap_options(),
                &tail_args.evt_options(),
            )?;
            formatter.tail(&report)?
        }
        Command::ShowConfig { model } => {
            let config = match model {
                ModelCommand::Single(single) => {
                    ExperimentConfig::Single(config::build_single(&single)?)
                }
                ModelCommand::Tandem(tandem_args) => {
                    ExperimentConfig::Tandem(config::build_tandem(&tandem_args)?)
                }
            };
            formatter.config(&config)?
        }
        Command::ListDistributions => families()
            .iter()
            .map(|(usage, description)| format!("{:<26}{}\n", usage, description))
            .collect(),
    };
    print!("{}", output);

    Ok(())
}

fn analyze_target(
    target: &AnalysisTarget,
    methods: &[analytics::ApproximationMethod],
) -> Result<AnalysisReport> {
    match target {
        AnalysisTarget::Single {
            stage,
            arrival_rate,
        } => Ok(AnalysisReport::Single(analytics::analyze_stage(
            stage,
            *arrival_rate,
            methods,
        )?)),
        AnalysisTarget::Tandem(config) => {
            let estimates = methods
                .iter()
                .map(|method| analytics::tandem(&TandemParams::from_config(config, *method)?))
                .collect::<Result<Vec<_>>>()?;
            Ok(AnalysisReport::Tandem { estimates })
        }
    }
}

fn formatter_for(format: &FormatArg) -> Box<dyn Formatter> {
    match format {
        FormatArg::Human => Box::new(HumanFormatter),
        FormatArg::Summary => Box::new(SummaryFormatter),
        FormatArg::Json => Box::new(JsonFormatter),
    }
}
