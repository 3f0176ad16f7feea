use std::path::Path;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use hsa_footprints::app::{App, OverlapParams, ProgressSink};
use hsa_footprints::config::ConfigLoader;
use hsa_footprints::domain::{radec_to_targname, DustModel, SkyBox};
use hsa_footprints::dust::{DustClient, DustHttpClient};
use hsa_footprints::error::HsaError;
use hsa_footprints::mast::{BundleInfo, BundleRequest, MastClient, MastHttpClient};
use hsa_footprints::output::{JsonOutput, StderrProgress};
use hsa_footprints::overlaps::OverlapSettings;
use hsa_footprints::plot::{render_table_plot, FilterPalette};
use hsa_footprints::products::ProductMap;
use hsa_footprints::query::{HsaClient, HsaHttpClient, QueryFilter, QueryOptions};
use hsa_footprints::store::Workspace;
use hsa_footprints::table::ObservationTable;

#[derive(Parser)]
#[command(name = "hsa-fp")]
#[command(about = "Query the ESA Hubble Science Archive and cluster overlapping footprints")]
#[command(version, author)]
struct Cli {
    /// Print results as JSON instead of a human summary
    #[arg(long, global = true)]
    json: bool,

    /// Directory for output artifacts (default: current directory)
    #[arg(long, global = true)]
    output_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run a metadata query and optionally save the CSV table")]
    Query(QueryArgs),
    #[command(about = "Cluster overlapping footprints and write per-cluster artifacts")]
    Overlaps(OverlapsArgs),
    #[command(about = "Generate curl download commands for a saved query table")]
    CurlScript(CurlScriptArgs),
    #[command(about = "Request a MAST bundle for a saved query table")]
    MastBundle(MastBundleArgs),
    #[command(about = "Look up Galactic dust reddening at a position")]
    Dust(DustArgs),
    #[command(about = "Derive a target name from coordinates")]
    Targname(TargnameArgs),
    #[command(about = "Plot the footprints of a saved query table")]
    Plot(PlotArgs),
}

#[derive(Args, Clone)]
struct FilterArgs {
    /// Box search region as ra,dec,radius_arcmin
    #[arg(long = "box")]
    sky_box: Option<String>,

    #[arg(long = "proposal-id")]
    proposal_ids: Vec<u32>,

    #[arg(long = "instrument")]
    instruments: Vec<String>,

    #[arg(long = "filter")]
    filters: Vec<String>,

    #[arg(long = "extension")]
    extensions: Vec<String>,

    /// Raw query clause appended as-is
    #[arg(long = "extra")]
    extra: Vec<String>,
}

impl FilterArgs {
    fn to_filter(&self) -> Result<QueryFilter, HsaError> {
        let sky_box = self
            .sky_box
            .as_deref()
            .map(str::parse::<SkyBox>)
            .transpose()?;
        Ok(QueryFilter {
            sky_box,
            proposal_ids: self.proposal_ids.clone(),
            instruments: self.instruments.clone(),
            filters: self.filters.clone(),
            extensions: self.extensions.clone(),
            extra: self.extra.clone(),
        })
    }
}

#[derive(Args, Clone)]
struct QueryArgs {
    #[command(flatten)]
    filter: FilterArgs,

    #[arg(long, default_value_t = 100_000)]
    max_items: usize,

    #[arg(long, default_value = "OBSERVATION_ID")]
    sort: String,

    /// Keep the temporary CSV response file
    #[arg(long)]
    keep_tempfile: bool,

    /// Save the table as CSV under this name in the output directory
    #[arg(long)]
    save: Option<String>,
}

#[derive(Args, Clone)]
struct OverlapsArgs {
    #[command(flatten)]
    filter: FilterArgs,

    /// JSON job file with filter lists, box and overlap settings
    #[arg(long)]
    config: Option<String>,

    /// Reuse a saved query table instead of querying the archive
    #[arg(long)]
    input: Option<String>,

    #[arg(long, default_value_t = 1.0)]
    buffer_arcmin: f64,

    /// Intersection-area threshold in deg^2 scaled by 3600
    #[arg(long, default_value_t = 0.5)]
    threshold: f64,

    #[arg(long, default_value_t = 3)]
    passes: usize,

    /// Skip clusters whose plot file already exists
    #[arg(long)]
    skip_existing: bool,
}

#[derive(Args, Clone)]
struct CurlScriptArgs {
    /// Saved query table (CSV)
    input: String,

    /// Product code overriding the per-detector mapping
    #[arg(long)]
    level: Option<String>,

    /// Save the commands as a shell script under this name
    #[arg(long)]
    script: Option<String>,
}

#[derive(Args, Clone)]
struct MastBundleArgs {
    /// Saved query table (CSV)
    input: String,

    #[arg(long, default_value = "mastDownload")]
    filename: String,

    /// Download the packaged bundle after requesting it
    #[arg(long)]
    retrieve: bool,
}

#[derive(Args, Clone)]
struct DustArgs {
    ra: f64,
    dec: f64,

    #[arg(long, value_enum, default_value = "sandf")]
    model: DustModel,
}

#[derive(Args, Clone)]
struct TargnameArgs {
    ra: f64,
    dec: f64,

    #[arg(long, default_value_t = 10_000.0)]
    scale: f64,
}

#[derive(Args, Clone)]
struct PlotArgs {
    /// Saved query table (CSV)
    input: String,

    #[arg(long, default_value = "footprints.png")]
    out: String,

    #[arg(long, default_value = "footprints")]
    title: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(hsa) = report.downcast_ref::<HsaError>() {
            return ExitCode::from(map_exit_code(hsa));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HsaError) -> u8 {
    match error {
        HsaError::MissingConfig
        | HsaError::ConfigRead(_)
        | HsaError::InvalidBox(_)
        | HsaError::InvalidObservationId(_)
        | HsaError::EmptyQuery(_) => 2,
        HsaError::HsaHttp(_)
        | HsaError::HsaStatus { .. }
        | HsaError::MastHttp(_)
        | HsaError::MastStatus { .. }
        | HsaError::MastBundle(_)
        | HsaError::DustHttp(_)
        | HsaError::DustStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let workspace = match &cli.output_dir {
        Some(dir) => Workspace::new_with_root(Utf8PathBuf::from(dir)),
        None => Workspace::new().into_diagnostic()?,
    };

    match cli.command {
        Commands::Query(args) => run_query(args, workspace, cli.json),
        Commands::Overlaps(args) => run_overlaps(args, workspace, cli.json, cli.output_dir.is_some()),
        Commands::CurlScript(args) => run_curl_script(args, workspace, cli.json),
        Commands::MastBundle(args) => run_mast_bundle(args, workspace, cli.json),
        Commands::Dust(args) => run_dust(args, workspace, cli.json),
        Commands::Targname(args) => run_targname(args, cli.json),
        Commands::Plot(args) => run_plot(args, workspace),
    }
}

fn progress(json: bool) -> &'static dyn ProgressSink {
    if json {
        &JsonOutput
    } else {
        &StderrProgress
    }
}

fn online_app(workspace: Workspace) -> miette::Result<App<HsaHttpClient, MastHttpClient, DustHttpClient>> {
    let hsa = HsaHttpClient::new().into_diagnostic()?;
    let mast = MastHttpClient::new().into_diagnostic()?;
    let dust = DustHttpClient::new().into_diagnostic()?;
    Ok(App::new(workspace, hsa, mast, dust))
}

fn offline_app(workspace: Workspace) -> App<NopHsa, NopMast, NopDust> {
    App::new(workspace, NopHsa, NopMast, NopDust)
}

fn query_options(args: &QueryArgs) -> QueryOptions {
    QueryOptions {
        max_items: args.max_items,
        sort_column: args.sort.clone(),
        keep_tempfile: args.keep_tempfile,
        ..QueryOptions::default()
    }
}

fn run_query(args: QueryArgs, workspace: Workspace, json: bool) -> miette::Result<()> {
    let filter = args.filter.to_filter().into_diagnostic()?;
    let options = query_options(&args);
    let app = online_app(workspace)?;

    match app.query(&filter, &options, args.save.as_deref(), progress(json)) {
        Ok((_, result)) => {
            if json {
                JsonOutput::print_query(&result).into_diagnostic()?;
            } else {
                println!("rows: {}", result.rows);
                if let Some(path) = &result.saved_path {
                    println!("saved: {path}");
                }
            }
            Ok(())
        }
        // an empty result is reported, not a failure
        Err(HsaError::EmptyQuery(clauses)) => {
            eprintln!("Empty query:\n {clauses}");
            Ok(())
        }
        Err(err) => Err(err).into_diagnostic(),
    }
}

fn run_overlaps(
    args: OverlapsArgs,
    workspace: Workspace,
    json: bool,
    output_dir_overridden: bool,
) -> miette::Result<()> {
    let (filter, mut settings, config_output_dir) = match &args.config {
        Some(path) => {
            let job = ConfigLoader::resolve(Some(path)).into_diagnostic()?;
            (job.filter, job.settings, job.output_dir)
        }
        None => {
            let settings = OverlapSettings {
                buffer_arcmin: args.buffer_arcmin,
                area_threshold: args.threshold,
                refine_passes: args.passes,
                skip_existing: false,
            };
            (args.filter.to_filter().into_diagnostic()?, settings, None)
        }
    };
    settings.skip_existing = settings.skip_existing || args.skip_existing;

    let workspace = match config_output_dir {
        Some(dir) if !output_dir_overridden => Workspace::new_with_root(dir),
        _ => workspace,
    };
    let app = online_app(workspace)?;

    let table = match &args.input {
        Some(path) => ObservationTable::from_csv_path(Path::new(path)).into_diagnostic()?,
        None => {
            match app.query(&filter, &QueryOptions::default(), None, progress(json)) {
                Ok((table, _)) => table,
                Err(HsaError::EmptyQuery(clauses)) => {
                    eprintln!("Empty query:\n {clauses}");
                    return Ok(());
                }
                Err(err) => return Err(err).into_diagnostic(),
            }
        }
    };

    // secondary queries default to a wider instrument criterion
    let instruments = if filter.instruments.is_empty() {
        vec!["WFC3".to_string(), "ACS".to_string()]
    } else {
        filter.instruments.clone()
    };
    let params = OverlapParams {
        settings,
        instruments,
        filters: filter.filters.clone(),
        proposal_ids: filter.proposal_ids.clone(),
    };

    let result = app
        .find_overlaps(&table, &params, progress(json))
        .into_diagnostic()?;

    if json {
        JsonOutput::print_overlaps(&result).into_diagnostic()?;
    } else {
        for cluster in &result.clusters {
            println!(
                "{}  members={}  matched={}  {}",
                cluster.name, cluster.members, cluster.matched_rows, cluster.action
            );
        }
    }
    Ok(())
}

fn run_curl_script(args: CurlScriptArgs, workspace: Workspace, json: bool) -> miette::Result<()> {
    let table = ObservationTable::from_csv_path(Path::new(&args.input)).into_diagnostic()?;
    let app = offline_app(workspace);
    let result = app
        .curl_script(
            &table,
            args.level.as_deref(),
            &ProductMap::default(),
            args.script.as_deref(),
            progress(json),
        )
        .into_diagnostic()?;

    if json {
        JsonOutput::print_curl_script(&result).into_diagnostic()?;
    } else {
        for command in &result.commands {
            println!("{command}");
        }
        if let Some(path) = &result.script_path {
            eprintln!("saved: {path}");
        }
    }
    Ok(())
}

fn run_mast_bundle(args: MastBundleArgs, workspace: Workspace, json: bool) -> miette::Result<()> {
    let table = ObservationTable::from_csv_path(Path::new(&args.input)).into_diagnostic()?;
    let app = online_app(workspace)?;
    let result = app
        .mast_bundle(
            &table,
            &ProductMap::default(),
            &args.filename,
            args.retrieve,
            progress(json),
        )
        .into_diagnostic()?;

    if json {
        JsonOutput::print_mast_bundle(&result).into_diagnostic()?;
    } else {
        println!("{}", result.url);
        if let Some(path) = &result.saved_path {
            println!("saved: {path}");
        }
    }
    Ok(())
}

fn run_dust(args: DustArgs, workspace: Workspace, json: bool) -> miette::Result<()> {
    let app = online_app(workspace)?;
    let result = app
        .dust(args.ra, args.dec, args.model, progress(json))
        .into_diagnostic()?;

    if json {
        JsonOutput::print_dust(&result).into_diagnostic()?;
    } else {
        println!("E(B-V) [{}] = {:.4}", result.model, result.ebv);
    }
    Ok(())
}

fn run_targname(args: TargnameArgs, json: bool) -> miette::Result<()> {
    let name = radec_to_targname(args.ra, args.dec, args.scale);
    if json {
        println!("{}", serde_json::json!({ "targname": name }));
    } else {
        println!("{name}");
    }
    Ok(())
}

fn run_plot(args: PlotArgs, workspace: Workspace) -> miette::Result<()> {
    let table = ObservationTable::from_csv_path(Path::new(&args.input)).into_diagnostic()?;
    workspace.ensure_root().into_diagnostic()?;
    let out = workspace.root().join(&args.out);
    render_table_plot(
        out.as_std_path(),
        &table,
        &args.title,
        &FilterPalette::default(),
    )
    .into_diagnostic()?;
    println!("{out}");
    Ok(())
}

#[derive(Clone, Copy)]
struct NopHsa;
#[derive(Clone, Copy)]
struct NopMast;
#[derive(Clone, Copy)]
struct NopDust;

impl HsaClient for NopHsa {
    fn search(
        &self,
        _filter: &QueryFilter,
        _options: &QueryOptions,
    ) -> Result<ObservationTable, HsaError> {
        Err(HsaError::HsaHttp("offline subcommand".to_string()))
    }
}

impl MastClient for NopMast {
    fn request_bundle(&self, _bundle: &BundleRequest) -> Result<BundleInfo, HsaError> {
        Err(HsaError::MastHttp("offline subcommand".to_string()))
    }

    fn download(&self, _url: &str, _destination: &Path) -> Result<(), HsaError> {
        Err(HsaError::MastHttp("offline subcommand".to_string()))
    }
}

impl DustClient for NopDust {
    fn reddening(&self, _ra: f64, _dec: f64, _model: DustModel) -> Result<f64, HsaError> {
        Err(HsaError::DustHttp("offline subcommand".to_string()))
    }
}
