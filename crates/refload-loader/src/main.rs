//! refload - load cloud-hosted files into a DSS data store by reference

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use refload_common::logging::{init_logging, LogConfig};
use refload_loader::aws;
use refload_loader::config::LoaderConfig;
use refload_loader::loader::{BatchSummary, BundleLoader};
use refload_loader::metadata::gcs::{AuthorizedUserSource, GcsHeadClient, GCS_API_BASE};
use refload_loader::metadata::s3::{AssumeRoleSource, S3HeadClient};
use refload_loader::metadata::{CredentialSet, MetadataResolver};
use refload_loader::parser::{BundleParser, Gen3Parser, StandardParser};
use refload_loader::registrar::Registrar;
use refload_loader::staging::S3Stager;
use refload_loader::store::DssClient;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "refload")]
#[command(author, version, about = "Load cloud-hosted files into a DSS data store by reference")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error, critical)
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every bundle of a batch document
    Load(LoadArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InputFormat {
    Standard,
    Gen3,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("mode").required(true).args(["dry_run", "no_dry_run"])))]
struct LoadArgs {
    /// Batch document (JSON list of bundles)
    input: PathBuf,

    /// Log every registration without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Write to the staging bucket and the data store
    #[arg(long)]
    no_dry_run: bool,

    /// DSS API base URL
    #[arg(long)]
    dss_endpoint: Option<String>,

    /// Bucket used to stage files for copy
    #[arg(long)]
    staging_bucket: Option<String>,

    /// File holding an IAM role ARN for S3 metadata reads
    #[arg(long)]
    aws_metadata_cred: Option<PathBuf>,

    /// GCP authorized_user JSON for GCS metadata reads
    #[arg(long)]
    gcp_metadata_cred: Option<PathBuf>,

    /// Project billed for requester-pays GCS reads
    #[arg(long)]
    google_project_id: Option<String>,

    /// Input document dialect
    #[arg(long, value_enum, default_value_t = InputFormat::Standard)]
    format: InputFormat,

    /// Schema URL recorded as `describedBy` on metadata files
    #[arg(long)]
    schema_url: Option<String>,
}

impl LoadArgs {
    fn apply(&self, config: &mut LoaderConfig) {
        if let Some(endpoint) = &self.dss_endpoint {
            config.dss_endpoint = Some(endpoint.clone());
        }
        if let Some(bucket) = &self.staging_bucket {
            config.staging_bucket = Some(bucket.clone());
        }
        if let Some(path) = &self.aws_metadata_cred {
            config.aws_metadata_cred = Some(path.clone());
        }
        if let Some(path) = &self.gcp_metadata_cred {
            config.gcp_metadata_cred = Some(path.clone());
        }
        if let Some(project) = &self.google_project_id {
            config.google_project_id = project.clone();
        }
        if let Some(url) = &self.schema_url {
            config.schema_url = Some(url.clone());
        }
    }

    fn parser(&self) -> Box<dyn BundleParser> {
        match self.format {
            InputFormat::Standard => Box::new(StandardParser),
            InputFormat::Gen3 => Box::new(Gen3Parser),
        }
    }
}

/// Cancel `token` on Ctrl+C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping after the current step");
                token.cancel();
            },
            Err(e) => tracing::error!("Failed to install Ctrl+C handler: {}", e),
        }
    });
}

async fn build_loader(
    config: &LoaderConfig,
    args: &LoadArgs,
    cancel: CancellationToken,
) -> Result<BundleLoader> {
    let sdk_config = aws::load_sdk_config(&config.s3).await;
    let s3_client = aws::s3_client(&sdk_config, &config.s3);

    let mut s3_credentials = CredentialSet::new(Arc::new(S3HeadClient::new(s3_client.clone())));
    if let Some(path) = &config.aws_metadata_cred {
        s3_credentials = s3_credentials.with_elevated(Arc::new(AssumeRoleSource::new(path, config.s3.clone())));
    }

    let project = Some(config.google_project_id.clone());
    let gcs_primary = GcsHeadClient::new(GCS_API_BASE, project.clone(), config.gcs_access_token.clone())?;
    let mut gs_credentials = CredentialSet::new(Arc::new(gcs_primary));
    if let Some(path) = &config.gcp_metadata_cred {
        gs_credentials = gs_credentials.with_elevated(Arc::new(AuthorizedUserSource::new(path, project)));
    }

    let resolver = Arc::new(MetadataResolver::new(s3_credentials, gs_credentials));
    let store = Arc::new(DssClient::new(config.dss_endpoint()?, config.api_timeout())?);
    let stager = Arc::new(S3Stager::new(s3_client, config.staging_bucket()?));

    let registrar = Registrar::new(store, stager, resolver)
        .with_policy(config.copy_policy())
        .with_dry_run(args.dry_run)
        .with_cancellation(cancel);

    let mut loader = BundleLoader::new(registrar, args.parser());
    if let Some(url) = &config.schema_url {
        loader = loader.with_schema_url(url);
    }
    Ok(loader)
}

async fn run_load(args: LoadArgs) -> Result<BatchSummary> {
    let mut config = LoaderConfig::from_env()?;
    args.apply(&mut config);
    config.validate()?;

    let contents = tokio::fs::read_to_string(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let batch: serde_json::Value =
        serde_json::from_str(&contents).with_context(|| format!("{} is not valid JSON", args.input.display()))?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let loader = build_loader(&config, &args, cancel).await?;
    let dss_endpoint = config.dss_endpoint()?;
    info!(
        input = %args.input.display(),
        dss_endpoint = %dss_endpoint,
        schema_url = %loader.schema_url(),
        dry_run = args.dry_run,
        "Starting load"
    );

    let result = loader.load_all(&batch).await?;
    result.log_summary();
    Ok(result.summary())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut log_config = LogConfig::builder().log_file_prefix("refload").build().merge_env()?;
    if let Some(level) = &cli.log_level {
        log_config.level = level.parse()?;
    }
    init_logging(&log_config)?;

    match cli.command {
        Command::Load(args) => {
            let summary = run_load(args).await?;
            if !summary.all_loaded() {
                bail!(
                    "{} unparsed, {} failed, {} unattempted bundles",
                    summary.unparsed,
                    summary.load_failed,
                    summary.unattempted
                );
            }
        },
    }

    Ok(())
}
