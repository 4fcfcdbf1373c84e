use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use chrono::NaiveDate;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "scada")]
#[command(about = "WEM facility SCADA ingestion", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> site -> overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Fetch, aggregate and persist SCADA for one or more trading dates.
    /// With no target, ingests yesterday (market time) from the current channel.
    Ingest(IngestArgs),

    /// Compute missing daily renewable peaks from stored half-hourly rows.
    Backfill {
        #[arg(long)]
        start_date: NaiveDate,

        #[arg(long)]
        end_date: NaiveDate,

        /// Write the summary as pretty JSON
        #[arg(long)]
        output_summary: Option<PathBuf>,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// List trading dates with no half-hourly rows
    CheckMissing {
        #[arg(long)]
        start_date: NaiveDate,

        #[arg(long)]
        end_date: NaiveDate,

        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations
    Migrate,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Layered config paths in merge order
    #[arg(long = "config")]
    pub config_paths: Vec<String>,

    /// Abort on config keys nothing reads, instead of warning
    #[arg(long, default_value_t = false)]
    pub strict_config: bool,
}

#[derive(Args, Debug, Clone, Default)]
#[group(id = "target", multiple = false)]
pub struct IngestTarget {
    /// Single trading date (YYYY-MM-DD)
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Inclusive range start; requires --end-date
    #[arg(long, requires = "end_date")]
    pub start_date: Option<NaiveDate>,

    /// Whole month (YYYY-MM)
    #[arg(long)]
    pub month: Option<String>,

    /// Whole year, as twelve month batches
    #[arg(long)]
    pub year: Option<i32>,

    /// The N trading dates ending yesterday
    #[arg(long)]
    pub days_back: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[command(flatten)]
    pub target: IngestTarget,

    /// Inclusive range end
    #[arg(long, requires = "start_date")]
    pub end_date: Option<NaiveDate>,

    /// current | historical
    #[arg(long, default_value = "current")]
    pub channel: String,

    /// Re-ingest dates that already look complete
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Write the summary as pretty JSON
    #[arg(long)]
    pub output_summary: Option<PathBuf>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Dev-time env bootstrap; absence is fine.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = scada_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = scada_db::status(&pool).await?;
                    println!("db_ok={} has_schema={}", s.ok, s.has_schema);
                    println!(
                        "facilities={} half_hourly_rows={} daily_peaks={}",
                        s.facilities, s.half_hourly_rows, s.daily_peaks
                    );
                }
                DbCmd::Migrate => {
                    scada_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => commands::config_hash(&paths)?,

        Commands::Ingest(args) => commands::ingest::run(args).await?,

        Commands::Backfill {
            start_date,
            end_date,
            output_summary,
            config,
        } => commands::backfill::run(start_date, end_date, output_summary, config).await?,

        Commands::CheckMissing {
            start_date,
            end_date,
            config,
        } => commands::backfill::check_missing(start_date, end_date, config).await?,
    }

    Ok(())
}
