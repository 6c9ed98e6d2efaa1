use std::{
    io::Read,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use verimail_common::{logging::Verbosity, tracing};
use verimail_core::{
    BulkOptions, BulkProcessor, Config, Pipeline, RateLimitScope, RateWindow, RawConfig,
    config::Toggle,
};

const CONFIG_ENV: &str = "VERIMAIL_CONFIG";
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["./verimail.config.ron", "/etc/verimail/config.ron"];

/// Validate email addresses
#[derive(Parser, Debug)]
#[command(name = "verimail", version, about, long_about = None)]
struct Cli {
    /// Log more on stderr; repeat for more detail
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Settings applied on top of the configuration file.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Path to a RON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Start from a preset (fast, balanced or thorough)
    #[arg(short, long, global = true)]
    preset: Option<String>,

    /// Skip the MX lookup
    #[arg(long, global = true)]
    no_mx: bool,

    /// Skip the SMTP mailbox probe
    #[arg(long, global = true)]
    no_smtp: bool,

    /// Per-operation network timeout, in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate one or more addresses
    Check {
        #[arg(required = true)]
        emails: Vec<String>,
    },

    /// Validate addresses read one per line from a file ("-" for stdin)
    Bulk {
        input: PathBuf,

        /// Addresses validated at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Stop at the first address that cannot be checked
        #[arg(long)]
        fail_fast: bool,

        /// Global admission limit, as REQUESTS/SECONDS
        #[arg(long, value_parser = parse_rate)]
        global_rate: Option<RateWindow>,

        /// Admission limit for each recipient domain, as REQUESTS/SECONDS
        #[arg(long, value_parser = parse_rate)]
        domain_rate: Option<RateWindow>,
    },
}

fn parse_rate(s: &str) -> Result<RateWindow, String> {
    let (requests, window) = s
        .split_once('/')
        .ok_or_else(|| format!("expected REQUESTS/SECONDS, got '{s}'"))?;

    let requests = requests
        .trim()
        .parse()
        .map_err(|err| format!("invalid request count '{requests}': {err}"))?;
    let window_secs = window
        .trim()
        .parse()
        .map_err(|err| format!("invalid window '{window}': {err}"))?;

    Ok(RateWindow {
        requests,
        window_secs,
    })
}

/// Locate the configuration file.
///
/// An explicit `--config` or `VERIMAIL_CONFIG` must exist. Otherwise the
/// default locations are tried in order, and defaults are used if none exist.
fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            bail!("Config file not found: {}", path.display());
        }
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(path);
        if !path.exists() {
            bail!(
                "Config file specified in {CONFIG_ENV} not found: {}",
                path.display()
            );
        }
        return Ok(Some(path));
    }

    Ok(DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists()))
}

fn load_raw(overrides: &Overrides) -> anyhow::Result<RawConfig> {
    let Some(path) = find_config_file(overrides.config.as_deref())? else {
        tracing::debug!("No config file found, using defaults");
        return Ok(RawConfig::default());
    };

    tracing::debug!("Loading config from {}", path.display());
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Unable to read config file {}", path.display()))?;

    RawConfig::from_ron_str(&contents)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

impl Overrides {
    fn apply(&self, raw: &mut RawConfig) {
        if let Some(preset) = &self.preset {
            raw.preset = Some(preset.clone());
        }
        if self.no_mx {
            raw.mx = Some(Toggle::Enabled(false));
        }
        if self.no_smtp {
            raw.smtp = Some(Toggle::Enabled(false));
        }
        if let Some(timeout) = self.timeout_ms {
            raw.timeout_ms = Some(timeout);
        }
    }
}

fn read_addresses(input: &Path) -> anyhow::Result<Vec<String>> {
    let contents = if input == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Unable to read addresses from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Unable to read {}", input.display()))?
    };

    Ok(addresses(&contents))
}

/// One address per line; blank lines and `#` comments are skipped.
fn addresses(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

async fn check(config: &Config, emails: &[String]) -> anyhow::Result<bool> {
    let pipeline = Pipeline::new(&config.validation)?;
    let mut all_valid = true;

    for email in emails {
        let result = pipeline.validate(email).await;
        all_valid &= result.valid;
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(all_valid)
}

async fn bulk(config: Config, emails: &[String]) -> anyhow::Result<bool> {
    let pipeline = Pipeline::new(&config.validation)?;

    let options = BulkOptions {
        concurrency: config.concurrency,
        continue_on_error: config.continue_on_error,
        rate_limit: config.rate_limit,
        on_progress: Some(Arc::new(|completed: usize, total: usize| {
            if completed == total || completed % 100 == 0 {
                tracing::info!(completed, total, "Progress");
            }
        })),
    };

    let processor = BulkProcessor::new(Arc::new(pipeline), options)?;
    let outcome = processor.process(emails).await?;

    tracing::info!(
        total = outcome.total,
        valid = outcome.valid,
        invalid = outcome.invalid,
        errors = outcome.errors,
        elapsed_ms = outcome.elapsed_ms,
        "Bulk validation complete"
    );

    if let Some(stats) = processor
        .rate_limiter()
        .and_then(|limiter| limiter.stats(&RateLimitScope::Global))
    {
        tracing::debug!(
            available = stats.available_tokens,
            capacity = stats.capacity,
            refill_rate = stats.refill_rate,
            "Global rate limit remaining"
        );
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(outcome.valid == outcome.total)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    verimail_common::logging::init(Verbosity {
        verbose: cli.verbose,
        quiet: cli.quiet,
    });

    let mut raw = load_raw(&cli.overrides)?;
    cli.overrides.apply(&mut raw);

    let all_valid = match cli.command {
        Commands::Check { emails } => check(&raw.resolve()?, &emails).await?,
        Commands::Bulk {
            input,
            concurrency,
            fail_fast,
            global_rate,
            domain_rate,
        } => {
            if let Some(concurrency) = concurrency {
                raw.concurrency = Some(concurrency);
            }
            if fail_fast {
                raw.continue_on_error = Some(false);
            }
            if global_rate.is_some() || domain_rate.is_some() {
                let mut rate_limit = raw.rate_limit.take().unwrap_or_default();
                rate_limit.global = global_rate.or(rate_limit.global);
                rate_limit.per_domain = domain_rate.or(rate_limit.per_domain);
                raw.rate_limit = Some(rate_limit);
            }

            let emails = read_addresses(&input)?;
            bulk(raw.resolve()?, &emails).await?
        }
    };

    Ok(if all_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
