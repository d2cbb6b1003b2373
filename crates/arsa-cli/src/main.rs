use std::path::PathBuf;
use std::process::ExitCode;

use arsa_adapters::InputFormat;
use arsa_storage::{CatalogStore, FileCatalogStore, PostgrestStore, RemoteCatalogStore};
use arsa_sync::{
    AssetIndex, ImportOptions, ListingTemplate, Pipeline, PipelineConfig, PipelineError,
    PlaceholderParcels, PriceMode, RandomVariation, RemoteConfig, SyncStrategy, TemplateKind,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::error;
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "arsa")]
#[command(about = "Land listing import, image matching and catalog maintenance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import parcel records into the catalog.
    Import(ImportArgs),
    /// Match listings to image assets and write the image field.
    Images(ImagesArgs),
    /// Zero prices and blank size, cadastral codes and descriptions.
    Clear(ClearArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Xlsx,
    Csv,
    Json,
    Tsv,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    IncrementalAppend,
    FullReplace,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PricingArg {
    Fixed,
    Variable,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TemplateArg {
    Spreadsheet,
    TextDump,
}

#[derive(Debug, Args)]
struct ImportArgs {
    input: PathBuf,
    #[arg(long, value_enum)]
    format: Option<FormatArg>,
    #[arg(long, value_enum, default_value = "incremental-append")]
    strategy: StrategyArg,
    #[arg(long, value_enum, default_value = "fixed")]
    pricing: PricingArg,
    /// Price per m²; defaults to ARSA_BASE_RATE or 1500.
    #[arg(long)]
    base_rate: Option<i64>,
    #[arg(long, value_enum, default_value = "spreadsheet")]
    template: TemplateArg,
    /// Comma-separated feature list replacing the template's defaults.
    #[arg(long, value_delimiter = ',')]
    features: Vec<String>,
    /// Fill missing area, ada and parsel with random placeholder values.
    #[arg(long)]
    placeholder_parcels: bool,
    /// Seed for the price variation and placeholder draws.
    #[arg(long)]
    seed: Option<u64>,
    /// Use a JSON catalog file instead of the remote store.
    #[arg(long)]
    catalog: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ImagesArgs {
    #[arg(long, default_value = "assets.yaml")]
    assets: PathBuf,
    #[arg(long)]
    catalog: Option<PathBuf>,
    /// Report matches without writing them.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ClearArgs {
    #[arg(long)]
    catalog: Option<PathBuf>,
}

impl ImportArgs {
    fn options(&self, config: &PipelineConfig) -> ImportOptions {
        let mut options = ImportOptions::new(&self.input);
        options.format = self.format.map(|format| match format {
            FormatArg::Xlsx => InputFormat::Xlsx,
            FormatArg::Csv => InputFormat::Csv,
            FormatArg::Json => InputFormat::Json,
            FormatArg::Tsv => InputFormat::Tsv,
        });
        options.strategy = match self.strategy {
            StrategyArg::IncrementalAppend => SyncStrategy::IncrementalAppend,
            StrategyArg::FullReplace => SyncStrategy::FullReplace,
        };
        options.price_mode = match self.pricing {
            PricingArg::Fixed => PriceMode::Fixed,
            PricingArg::Variable => PriceMode::Variable,
        };
        options.pricing.base_rate = self.base_rate.unwrap_or(config.base_rate);
        let template = ListingTemplate::new(match self.template {
            TemplateArg::Spreadsheet => TemplateKind::Spreadsheet,
            TemplateArg::TextDump => TemplateKind::TextDump,
        });
        let features: Vec<String> = self
            .features
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        options.template = if features.is_empty() {
            template
        } else {
            template.with_features(features)
        };
        if self.placeholder_parcels {
            options.placeholders = Some(PlaceholderParcels::default());
        }
        options
    }
}

fn load_env_files() {
    // .env.local first: dotenv never overwrites a variable that is already set
    let _ = dotenv::from_filename(".env.local");
    let _ = dotenv::dotenv();
}

fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}

/// File catalog when a path is given, otherwise the remote table. Remote configuration
/// is validated here, before any call goes out.
fn open_catalog(path: Option<PathBuf>, config: &PipelineConfig) -> Result<Box<dyn CatalogStore>, PipelineError> {
    match path {
        Some(path) => Ok(Box::new(FileCatalogStore::new(path))),
        None => {
            let remote = RemoteConfig::from_env()?;
            let store = PostgrestStore::new(remote.postgrest(config))?;
            Ok(Box::new(RemoteCatalogStore::new(store, config.lands_table.clone())))
        }
    }
}

async fn run(cli: Cli) -> Result<(), PipelineError> {
    let config = PipelineConfig::from_env();
    let pipeline = Pipeline::new(config.clone());

    match cli.command {
        Commands::Import(args) => {
            let options = args.options(&config);
            let catalog = open_catalog(args.catalog.clone(), &config)?;
            let mut variation = match args.seed {
                Some(seed) => RandomVariation::seeded(seed),
                None => RandomVariation::from_entropy(),
            };
            let summary = pipeline.import(catalog.as_ref(), &options, &mut variation).await?;
            println!(
                "import complete: run_id={} read={} duplicates={} skipped={} created={} first_id={} catalog={} target={}",
                summary.run_id,
                summary.records_read,
                summary.duplicates_dropped,
                summary.skipped.len(),
                summary.listings_created,
                summary
                    .first_new_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                summary.catalog_size,
                summary.target
            );
            for row in &summary.skipped {
                println!("  skipped row {}: {}", row.row, row.reason);
            }
            if !summary.overlapping_locations.is_empty() {
                println!(
                    "  warning: {} location(s) were already listed",
                    summary.overlapping_locations.len()
                );
            }
            println!("report: {}", summary.report_path.display());
        }
        Commands::Images(args) => {
            if !args.assets.exists() {
                return Err(PipelineError::Precondition(format!(
                    "assets file {} not found",
                    args.assets.display()
                )));
            }
            let index = AssetIndex::from_yaml_file(&args.assets).await?;
            let catalog = open_catalog(args.catalog, &config)?;
            let summary = pipeline.sync_images(catalog.as_ref(), &index, args.dry_run).await?;
            for m in &summary.matches {
                match (&m.image_url, &m.suggestion) {
                    (Some(_), _) => println!("{}: OK", m.neighborhood),
                    (None, Some(hint)) => println!("{}: no match (closest: {})", m.neighborhood, hint.stem),
                    (None, None) => println!("{}: no match", m.neighborhood),
                }
            }
            println!(
                "images complete: run_id={} listings={} matched={} missed={} updated={} dry_run={}",
                summary.run_id, summary.listings, summary.matched, summary.missed, summary.updated, summary.dry_run
            );
            println!("report: {}", summary.report_path.display());
        }
        Commands::Clear(args) => {
            let catalog = open_catalog(args.catalog, &config)?;
            let summary = pipeline.clear(catalog.as_ref()).await?;
            println!(
                "clear complete: run_id={} cleared={} target={}",
                summary.run_id, summary.cleared, summary.target
            );
            println!("report: {}", summary.report_path.display());
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    load_env_files();
    let cli = Cli::parse();
    if let Err(err) = init_tracing("arsa=info") {
        eprintln!("{err:#}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            error!(exit_code = code, "run failed");
            eprintln!("error: {:#}", anyhow::Error::from(err));
            ExitCode::from(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_import_flags() {
        let cli = Cli::try_parse_from([
            "arsa",
            "import",
            "clean_data.txt",
            "--strategy",
            "full-replace",
            "--pricing",
            "variable",
            "--template",
            "text-dump",
            "--features",
            "Müstakil Tapu, Elektrik Yakın",
            "--placeholder-parcels",
            "--seed",
            "7",
        ])
        .unwrap();
        let Commands::Import(args) = cli.command else {
            panic!("expected import");
        };
        let options = args.options(&PipelineConfig::default());
        assert_eq!(options.strategy, SyncStrategy::FullReplace);
        assert_eq!(options.price_mode, PriceMode::Variable);
        assert_eq!(options.template.kind, TemplateKind::TextDump);
        assert_eq!(options.template.features, vec!["Müstakil Tapu", "Elektrik Yakın"]);
        assert!(options.placeholders.is_some());
        assert_eq!(options.pricing.base_rate, 1500);
        assert_eq!(args.seed, Some(7));
    }

    #[test]
    fn import_defaults_match_the_spreadsheet_flow() {
        let cli = Cli::try_parse_from(["arsa", "import", "satis.csv", "--base-rate", "1750"]).unwrap();
        let Commands::Import(args) = cli.command else {
            panic!("expected import");
        };
        let options = args.options(&PipelineConfig::default());
        assert_eq!(options.strategy, SyncStrategy::IncrementalAppend);
        assert_eq!(options.price_mode, PriceMode::Fixed);
        assert_eq!(options.template.kind, TemplateKind::Spreadsheet);
        assert_eq!(options.pricing.base_rate, 1750);
        assert!(options.format.is_none());
        assert!(options.placeholders.is_none());
    }

    #[test]
    fn workbook_format_can_be_forced() {
        let cli = Cli::try_parse_from(["arsa", "import", "satis-list", "--format", "xlsx"]).unwrap();
        let Commands::Import(args) = cli.command else {
            panic!("expected import");
        };
        assert_eq!(args.options(&PipelineConfig::default()).format, Some(InputFormat::Xlsx));
    }

    #[test]
    fn file_catalog_needs_no_remote_config() {
        let catalog = open_catalog(Some(PathBuf::from("lands.json")), &PipelineConfig::default()).unwrap();
        assert_eq!(catalog.describe(), "file lands.json");
    }
}
