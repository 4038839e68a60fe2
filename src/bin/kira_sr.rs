use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_structure_resolver::cache::{DEFAULT_CACHE_CAPACITY, StructureCache};
use kira_structure_resolver::config::{
    Config, ConfigLoader, DEFAULT_TIMEOUT_SECS, IndexConfig, RunOverrides,
};
use kira_structure_resolver::domain::StructureId;
use kira_structure_resolver::error::ResolverError;
use kira_structure_resolver::index::LocalIndex;
use kira_structure_resolver::normalize::OrganismNormalizer;
use kira_structure_resolver::output::{
    CrossRefResult, JsonOutput, OrganismList, OutputMode, StderrProgress, print_run_summary,
};
use kira_structure_resolver::pipeline::{Pipeline, ProgressSink};
use kira_structure_resolver::rcsb::RcsbHttpClient;
use kira_structure_resolver::reference::ReferenceTable;
use kira_structure_resolver::resolver::MetadataResolver;

#[derive(Parser)]
#[command(name = "kira-sr")]
#[command(about = "Streaming PDB structure resolver with organism and longevity classification")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve a JSON-lines stream of structure entries")]
    Run(RunArgs),
    #[command(about = "Normalize and classify an organism name")]
    Classify(ClassifyArgs),
    #[command(about = "Show protein and organism details for one chain")]
    Chain(ChainArgs),
    #[command(about = "List organisms in the reference table")]
    Organisms(ReferenceArgs),
    #[command(about = "Find structures carrying a UniProt accession")]
    Xref(XrefArgs),
    #[command(about = "Show which local data files are available")]
    Data,
}

#[derive(Args, Clone, Default)]
struct ReferenceArgs {
    #[arg(long)]
    reference: Option<Utf8PathBuf>,
}

#[derive(Args, Clone, Default)]
struct SourceArgs {
    #[arg(long, requires = "taxonomy")]
    cross_refs: Option<Utf8PathBuf>,

    #[arg(long, requires = "cross_refs")]
    taxonomy: Option<Utf8PathBuf>,

    #[arg(long, help = "Skip the local index and query RCSB only")]
    remote_only: bool,

    #[arg(long, help = "Per-request timeout in seconds")]
    timeout: Option<u64>,

    #[arg(long)]
    retries: Option<u32>,
}

impl SourceArgs {
    fn index(&self) -> Option<IndexConfig> {
        Some(IndexConfig {
            cross_refs: self.cross_refs.clone()?,
            taxonomy: self.taxonomy.clone()?,
        })
    }
}

#[derive(Args)]
struct RunArgs {
    input: Utf8PathBuf,

    #[arg(long, short)]
    output: Utf8PathBuf,

    #[arg(long)]
    structured_output: Option<Utf8PathBuf>,

    #[arg(long, help = "Append to existing outputs and resume after the last written line")]
    append: bool,

    #[arg(long, help = "Line selection such as 1-100,250,900-")]
    lines: Option<String>,

    #[arg(long)]
    organism: Option<String>,

    #[arg(long)]
    classification: Option<String>,

    #[arg(long)]
    id_field: Option<String>,

    #[arg(long)]
    cache_capacity: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    workers: Option<usize>,

    #[command(flatten)]
    reference: ReferenceArgs,

    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Args)]
struct ClassifyArgs {
    name: String,

    #[command(flatten)]
    reference: ReferenceArgs,
}

#[derive(Args)]
struct ChainArgs {
    structure: String,
    chain: String,

    #[command(flatten)]
    reference: ReferenceArgs,

    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Args)]
struct XrefArgs {
    accession: String,

    #[command(flatten)]
    source: SourceArgs,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ResolverError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ResolverError) -> u8 {
    match error {
        ResolverError::DataLoad { .. }
        | ResolverError::ConfigRead(_)
        | ResolverError::ConfigParse(_)
        | ResolverError::InvalidLineFilter(_)
        | ResolverError::InvalidStructureId(_)
        | ResolverError::InvalidEntryId(_)
        | ResolverError::MalformedRecord { .. } => 2,
        ResolverError::RcsbHttp(_)
        | ResolverError::RcsbStatus { .. }
        | ResolverError::TransientResolution { .. }
        | ResolverError::NotFound(_) => 3,
        ResolverError::OutputWrite { .. } => 4,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => run_pipeline(args, config, output_mode),
        Commands::Classify(args) => run_classify(args, &config),
        Commands::Chain(args) => run_chain(args, &config),
        Commands::Organisms(args) => run_organisms(args, &config),
        Commands::Xref(args) => run_xref(args, &config),
        Commands::Data => {
            JsonOutput::print_data(&ConfigLoader::available_data(&config)).into_diagnostic()
        }
    }
}

fn http_client(config: &Config, source: &SourceArgs) -> Result<RcsbHttpClient, ResolverError> {
    let timeout = source
        .timeout
        .or(config.timeout_secs)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    RcsbHttpClient::new(Duration::from_secs(timeout))
}

fn load_reference(config: &Config, args: &ReferenceArgs) -> Result<ReferenceTable, ResolverError> {
    let path = ConfigLoader::reference_path(config, args.reference.clone());
    ReferenceTable::load(path.as_std_path())
}

fn resolver(
    config: &Config,
    source: &SourceArgs,
) -> Result<MetadataResolver<RcsbHttpClient>, ResolverError> {
    let mut resolver = MetadataResolver::new(
        http_client(config, source)?,
        StructureCache::new(config.cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY)),
        ConfigLoader::retry_policy(config, source.retries),
    );
    if !source.remote_only {
        if let Some(paths) = ConfigLoader::index_paths(config, source.index()) {
            let index = LocalIndex::load(
                paths.cross_refs.as_std_path(),
                paths.taxonomy.as_std_path(),
            )?;
            resolver = resolver.with_index(std::sync::Arc::new(index));
        }
    }
    Ok(resolver)
}

fn interrupt_flag() -> miette::Result<Arc<AtomicBool>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("interrupt received; finishing the current window");
    })
    .into_diagnostic()?;
    Ok(cancel)
}

fn run_pipeline(args: RunArgs, config: Config, output_mode: OutputMode) -> miette::Result<()> {
    let overrides = RunOverrides {
        input: args.input,
        output: args.output,
        structured_output: args.structured_output,
        append: args.append,
        lines: args.lines,
        organism: args.organism,
        classification: args.classification,
        reference: args.reference.reference.clone(),
        index: args.source.index(),
        remote_only: args.source.remote_only,
        id_field: args.id_field,
        cache_capacity: args.cache_capacity,
        batch_size: args.batch_size,
        workers: args.workers,
        retries: args.source.retries,
        timeout_secs: args.source.timeout,
    };
    let resolved = ConfigLoader::resolve_config(config, overrides)?;

    let input = resolved.input.clone();
    let pipeline = Pipeline::new(RcsbHttpClient::new(resolved.timeout)?);
    let cancel = interrupt_flag()?;
    let progress: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &StderrProgress,
        OutputMode::NonInteractive => &JsonOutput,
    };
    let summary = pipeline.run(&resolved, &cancel, progress)?;

    match output_mode {
        OutputMode::Interactive => print_run_summary(&summary),
        OutputMode::NonInteractive => JsonOutput::print_summary(&summary).into_diagnostic()?,
    }
    match summary.input_error {
        Some(message) => Err(ResolverError::data_load(input.as_std_path(), message).into()),
        None => Ok(()),
    }
}

fn run_classify(args: ClassifyArgs, config: &Config) -> miette::Result<()> {
    let table = load_reference(config, &args.reference)?;
    let normalizer = OrganismNormalizer::new().with_aliases(&config.aliases);
    let result = table.classify(&args.name, &normalizer);
    JsonOutput::print_classification(&result).into_diagnostic()
}

fn run_chain(args: ChainArgs, config: &Config) -> miette::Result<()> {
    let id: StructureId = args.structure.parse()?;
    let table = load_reference(config, &args.reference)?;
    let normalizer = OrganismNormalizer::new().with_aliases(&config.aliases);
    let resolver = resolver(config, &args.source)?;
    let use_local_index = resolver.has_index() && config.prefer_local_index.unwrap_or(true);
    let info = resolver.chain_info(&id, args.chain.trim(), &table, &normalizer, use_local_index);
    JsonOutput::print_chain(&info).into_diagnostic()
}

fn run_organisms(args: ReferenceArgs, config: &Config) -> miette::Result<()> {
    let table = load_reference(config, &args)?;
    let organisms = table.scientific_names();
    JsonOutput::print_organisms(&OrganismList {
        count: organisms.len(),
        organisms,
    })
    .into_diagnostic()
}

fn run_xref(args: XrefArgs, config: &Config) -> miette::Result<()> {
    let resolver = resolver(config, &args.source)?;
    let use_local_index = resolver.has_index() && config.prefer_local_index.unwrap_or(true);
    let structures = resolver.structures_for_cross_ref(args.accession.trim(), use_local_index)?;
    JsonOutput::print_cross_ref(&CrossRefResult {
        accession: args.accession.trim().to_uppercase(),
        structures,
    })
    .into_diagnostic()
}
