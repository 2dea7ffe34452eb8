use crate::demo::{run_demo, DemoArgs};
use crate::infra::{build_engine, load_catalog, load_engine_config, read_bundle};
use crate::render::print_assessment;
use crate::server;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use underwriting::config::{AppConfig, UnderwritingPaths};
use underwriting::error::AppError;
use underwriting::workflows::underwriting::{
    CaseType, FileSnapshotStore, RuleSetRegistry, UnderwritingService,
};

#[derive(Parser, Debug)]
#[command(
    name = "Underwriting Decision Engine",
    about = "Assess mortgage cases against versioned policy rule sets",
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
    /// Assess a case bundle JSON file and print the recommended decision
    Assess(AssessArgs),
    /// Inspect rule-set configuration
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
    /// Assess a set of built-in sample cases end to end
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// Load every rule set and the engine configuration, failing on the first error
    Validate(EngineArgs),
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

/// Overrides for the `UNDERWRITING_*` environment settings.
#[derive(Args, Debug, Default)]
pub(crate) struct EngineArgs {
    /// Engine configuration TOML (limits, stress test, rule-set routing)
    #[arg(long)]
    pub(crate) engine_config: Option<PathBuf>,
    /// Directory of additional rule-set files (.toml or .json)
    #[arg(long)]
    pub(crate) rules_dir: Option<PathBuf>,
}

impl EngineArgs {
    pub(crate) fn resolve(self) -> Result<UnderwritingPaths, AppError> {
        let mut paths = AppConfig::load()?.underwriting;
        if let Some(path) = self.engine_config {
            paths.engine_config = Some(path);
        }
        if let Some(dir) = self.rules_dir {
            paths.rules_dir = Some(dir);
        }
        Ok(paths)
    }
}

#[derive(Args, Debug)]
pub(crate) struct AssessArgs {
    /// Case bundle JSON file
    #[arg(long)]
    pub(crate) bundle: PathBuf,
    /// Record an audit snapshot under this directory
    #[arg(long)]
    pub(crate) snapshot_dir: Option<PathBuf>,
    /// Print the full assessment as JSON instead of a text report
    #[arg(long)]
    pub(crate) json: bool,
    #[command(flatten)]
    pub(crate) engine: EngineArgs,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Assess(args) => run_assess(args),
        Command::Rules {
            command: RulesCommand::Validate(args),
        } => run_rules_validate(args),
        Command::Demo(args) => run_demo(args),
    }
}

fn run_assess(args: AssessArgs) -> Result<(), AppError> {
    let AssessArgs {
        bundle,
        snapshot_dir,
        json,
        engine,
    } = args;

    let paths = engine.resolve()?;
    let engine = Arc::new(build_engine(&paths)?);
    let bundle = read_bundle(&bundle)?;

    let assessment = match snapshot_dir.or(paths.snapshot_dir) {
        Some(dir) => {
            let service = UnderwritingService::new(engine, Arc::new(FileSnapshotStore::new(&dir)));
            let snapshot = service.evaluate(&bundle)?;
            eprintln!(
                "recorded snapshot {} (digest {}) under {}",
                snapshot.snapshot_id(),
                snapshot.calculation_digest(),
                dir.display()
            );
            snapshot.assessment().clone()
        }
        None => engine.assess(&bundle),
    };

    if json {
        let rendered = serde_json::to_string_pretty(&assessment)
            .map_err(|err| AppError::Input(format!("assessment is not serializable: {err}")))?;
        println!("{rendered}");
    } else {
        print_assessment(&assessment);
    }
    Ok(())
}

fn run_rules_validate(args: EngineArgs) -> Result<(), AppError> {
    let paths = args.resolve()?;
    let catalog = load_catalog(&paths)?;
    let config = load_engine_config(&paths)?;
    let registry = RuleSetRegistry::new(&config, &catalog)?;

    println!("{} rule set(s) loaded", catalog.len());
    for id in catalog.ids() {
        let rules = catalog.get(id).map(|rule_set| rule_set.rules().len()).unwrap_or(0);
        println!("- {id}: {rules} rule(s)");
    }
    println!("Case routing:");
    for case_type in CaseType::ordered() {
        println!("- {} -> {}", case_type.label(), registry.resolve(case_type).id());
    }
    Ok(())
}
