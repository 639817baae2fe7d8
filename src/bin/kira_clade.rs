use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use kira_clade::app::{App, DownloadSummary};
use kira_clade::archive::ArchiveBuilder;
use kira_clade::config::{ConfigLoader, ResolvedConfig};
use kira_clade::domain::TaxonId;
use kira_clade::error::KiraError;
use kira_clade::fs_util::write_bytes_atomic;
use kira_clade::ncbi::NcbiHttpClient;
use kira_clade::output::JsonOutput;
use kira_clade::selection;
use kira_clade::server::{self, AppState};

#[derive(Parser)]
#[command(name = "kira-clade")]
#[command(about = "Find and download one gene's sequences across every species of a clade")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the HTTP API")]
    Serve(ServeArgs),
    #[command(about = "List species of a clade carrying a gene")]
    Discover(DiscoverArgs),
    #[command(about = "Discover, then download sequences as a zip archive")]
    Download(DownloadArgs),
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[derive(Args)]
struct DiscoverArgs {
    taxon: String,
    gene: String,
}

#[derive(Args)]
struct DownloadArgs {
    taxon: String,
    gene: String,

    /// Taxon ids to keep (`9685` or `txid9685`); all hits when omitted.
    #[arg(long, num_args = 1..)]
    select: Vec<TaxonId>,

    #[arg(long)]
    out: Option<Utf8PathBuf>,

    /// Also write every sequence into one `<taxon>_<gene>_all.fasta`.
    #[arg(long)]
    combined: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::UnknownTaxon(_)
        | KiraError::SelectionNotFound(_)
        | KiraError::InvalidIdentifier(_)
        | KiraError::InvalidQuery(_)
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_) => 2,
        KiraError::TransientFetch { .. }
        | KiraError::NcbiHttp(_)
        | KiraError::NcbiStatus { .. }
        | KiraError::NcbiDecode(_)
        | KiraError::CallTimeout(_)
        | KiraError::SessionTimeout(_) => 3,
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
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, cancelling");
                on_signal.cancel();
            }
        });

        match cli.command {
            Commands::Serve(args) => run_serve(args, config, cancel).await,
            Commands::Discover(args) => run_discover(args, &config, &cancel).await,
            Commands::Download(args) => run_download(args, &config, &cancel).await,
        }
    })
}

fn build_app(config: &ResolvedConfig) -> Result<App<NcbiHttpClient>, KiraError> {
    let ncbi = NcbiHttpClient::new(&config.ncbi)?;
    Ok(App::new(ncbi, config))
}

async fn run_serve(
    args: ServeArgs,
    config: ResolvedConfig,
    cancel: CancellationToken,
) -> miette::Result<()> {
    let app = build_app(&config)?;
    let bind = args.bind.unwrap_or(config.bind);
    let state = AppState::new(app, config.max_sessions, cancel);
    server::serve(bind, state).await?;
    Ok(())
}

async fn run_discover(
    args: DiscoverArgs,
    config: &ResolvedConfig,
    cancel: &CancellationToken,
) -> miette::Result<()> {
    let app = build_app(config)?;
    let outcome = app.discover(&args.taxon, &args.gene, cancel).await?;
    JsonOutput::print_discovery(&outcome).into_diagnostic()?;
    Ok(())
}

async fn run_download(
    args: DownloadArgs,
    config: &ResolvedConfig,
    cancel: &CancellationToken,
) -> miette::Result<()> {
    let mut app = build_app(config)?;
    if args.combined {
        app = app.with_archive_builder(ArchiveBuilder::new().with_combined_fasta(true));
    }

    let outcome = app.discover(&args.taxon, &args.gene, cancel).await?;
    let selected: BTreeSet<TaxonId> = if args.select.is_empty() {
        outcome.species.keys().copied().collect()
    } else {
        args.select.iter().copied().collect()
    };
    if selected.is_empty() {
        return Err(KiraError::InvalidQuery(format!(
            "no species under {} carry {}",
            args.taxon, args.gene
        ))
        .into());
    }
    let chosen = selection::resolve(&selected, &outcome)?;

    let archive = app.download(&chosen, &args.taxon, &args.gene, cancel).await?;
    let path = args
        .out
        .unwrap_or_else(|| Utf8PathBuf::from(archive.file_name.as_str()));
    write_bytes_atomic(&path, &archive.bytes)?;

    JsonOutput::print_download(&DownloadSummary::new(&archive, path.as_str())).into_diagnostic()?;
    Ok(())
}
