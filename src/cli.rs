use crate::utils::{format_duration, format_rate, parse_url_list};
use crate::{
    BatchAggregate, Config, ContactExtractor, HarvestService, ItemResult, LoadTestRequest,
    LoadTestSnapshot, ProgressTracker, StaticContentFetcher, TestType,
};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "contact-harvester")]
#[command(about = "Concurrent URL contact harvester")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Async pipeline worker count")]
    pub workers: Option<usize>,

    #[arg(long, help = "Async pipeline queue capacity")]
    pub queue_capacity: Option<usize>,

    #[arg(long, help = "Fork-join parallelism")]
    pub parallelism: Option<usize>,

    #[arg(long, help = "Fetch timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Serve this file's content for every address instead of fetching")]
    pub static_content: Option<PathBuf>,

    #[arg(long, help = "Expose Prometheus metrics on this port")]
    pub metrics_port: Option<u16>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Harvest contacts from URLs listed in a file
    Process {
        #[arg(short, long, help = "Input file containing URLs (one per line)")]
        input: PathBuf,

        #[arg(short, long, default_value = "async", help = "Strategy (async, fork-join, sync)")]
        strategy: TestType,

        #[arg(long, help = "Print the full report as JSON")]
        json: bool,

        #[arg(long, help = "Progress reporting interval in seconds")]
        progress_interval: Option<u64>,
    },

    /// Run the contact extractor over a local file
    Extract {
        #[arg(short, long, help = "File to scan")]
        input: PathBuf,

        #[arg(long, help = "Print findings as JSON")]
        json: bool,
    },

    /// Run a time-boxed load test
    LoadTest {
        #[arg(short, long, help = "Register URLs from this file before the test")]
        input: Option<PathBuf>,

        #[arg(long, default_value = "50", help = "Synthetic targets to generate")]
        url_count: u32,

        #[arg(long, default_value = "10", help = "Concurrent workers")]
        threads: u32,

        #[arg(long, default_value = "60", help = "Test duration in seconds")]
        duration: u64,

        #[arg(long, default_value = "100", help = "Pause between a worker's requests in milliseconds")]
        interval_ms: u64,

        #[arg(long, default_value = "async", help = "Test type (async, forkjoin, sync)")]
        test_type: TestType,

        #[arg(long, default_value_t = true, action = ArgAction::Set, help = "Generate synthetic targets")]
        generate_urls: bool,

        #[arg(long, default_value = "5", help = "Progress reporting interval in seconds")]
        progress_interval: u64,

        #[arg(long, help = "Print the final snapshot as JSON")]
        json: bool,
    },

    /// Validate configuration
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub input: PathBuf,
    pub strategy: TestType,
    pub json: bool,
    pub progress_interval: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct LoadTestOptions {
    pub input: Option<PathBuf>,
    pub request: LoadTestRequest,
    pub progress_interval: u64,
    pub json: bool,
}

pub struct CliRunner {
    pub config: Config,
    pub service: Arc<HarvestService>,
}

impl CliRunner {
    pub async fn new(mut config: Config, args: &Cli) -> Result<Self, Box<dyn std::error::Error>> {
        if let Some(workers) = args.workers {
            config.pipeline.worker_count = workers;
        }
        if let Some(capacity) = args.queue_capacity {
            config.pipeline.queue_capacity = capacity;
        }
        if let Some(parallelism) = args.parallelism {
            config.fork_join.parallelism = parallelism;
        }
        if let Some(timeout) = args.timeout {
            config.fetch.timeout = Duration::from_secs(timeout);
        }

        let service = match &args.static_content {
            Some(path) => {
                let body = fs::read_to_string(path).await?;
                info!("Serving all addresses from {}", path.display());
                let fetcher = StaticContentFetcher::new(200, body);
                HarvestService::with_fetcher(config.clone(), Arc::new(fetcher))?
            }
            None => HarvestService::new(config.clone())?,
        };

        Ok(Self {
            config,
            service: Arc::new(service),
        })
    }

    pub async fn run(&self, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
        match command {
            Commands::Process {
                input,
                strategy,
                json,
                progress_interval,
            } => {
                self.run_process(ProcessOptions {
                    input,
                    strategy,
                    json,
                    progress_interval,
                })
                .await
            }
            Commands::Extract { input, json } => self.run_extract(input, json).await,
            Commands::LoadTest {
                input,
                url_count,
                threads,
                duration,
                interval_ms,
                test_type,
                generate_urls,
                progress_interval,
                json,
            } => {
                self.run_load_test(LoadTestOptions {
                    input,
                    request: LoadTestRequest {
                        url_count,
                        thread_count: threads,
                        duration_seconds: duration,
                        request_interval_ms: interval_ms,
                        test_type,
                        generate_urls,
                    },
                    progress_interval,
                    json,
                })
                .await
            }
            Commands::Validate { config } => self.validate_config(config).await,
        }
    }

    pub async fn run_process(&self, options: ProcessOptions) -> Result<(), Box<dyn std::error::Error>> {
        info!("Starting {} contact harvesting", options.strategy);

        let urls = self.read_urls_from_file(&options.input).await?;
        info!("Loaded {} URLs from {}", urls.len(), options.input.display());

        let added = self.service.add_urls(urls).await;
        if added.is_empty() {
            return Err("No valid URLs to process".into());
        }

        let progress = Arc::new(ProgressTracker::new(added.len()));
        if let Some(seconds) = options.progress_interval {
            spawn_progress_reporter(progress.clone(), seconds);
        }

        let started = Instant::now();
        match options.strategy {
            TestType::Async => {
                let report = self.service.process_active_async_tracked(progress).await?;
                if options.json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    let items: Vec<&ItemResult> = report.results.iter().map(|r| r.item()).collect();
                    print_items(&items);
                    print_aggregate(&report.aggregate, started.elapsed());
                    println!("  Caller-run jobs: {}", report.caller_runs);
                }
            }
            TestType::ForkJoin => {
                let report = self.service.process_active_fork_join_tracked(progress).await?;
                if options.json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    let items: Vec<&ItemResult> = report.outcome.results.iter().collect();
                    print_items(&items);
                    print_aggregate(&report.outcome.aggregate, started.elapsed());
                    println!("  Batches: {}", report.stats.total_batches_processed);
                    println!("  Parallelism: {}", report.stats.parallelism);
                }
            }
            TestType::Sync => {
                let mut results = Vec::with_capacity(added.len());
                for target in &added {
                    let item = self.service.process_single(target).await;
                    progress.record_completion(item.success);
                    results.push(item);
                }
                if options.json {
                    println!("{}", serde_json::to_string_pretty(&results)?);
                } else {
                    let items: Vec<&ItemResult> = results.iter().collect();
                    print_items(&items);
                    print_aggregate(&BatchAggregate::from_batch(&results), started.elapsed());
                }
            }
        }

        Ok(())
    }

    pub async fn run_extract(&self, input: PathBuf, json: bool) -> Result<(), Box<dyn std::error::Error>> {
        let content = fs::read_to_string(&input).await?;
        let extractor = ContactExtractor::new(&self.config.extraction)?;
        let findings = extractor.extract(&content);

        if json {
            println!("{}", serde_json::to_string_pretty(&findings)?);
            return Ok(());
        }

        println!("Contacts found in {}:", input.display());
        if findings.is_empty() {
            println!("  (none)");
        }
        for (kind, value) in findings.contacts() {
            println!("  {kind}: {value}");
        }
        println!("  Quality score: {}", findings.quality_score());

        Ok(())
    }

    pub async fn run_load_test(&self, options: LoadTestOptions) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(input) = &options.input {
            let urls = self.read_urls_from_file(input).await?;
            self.service.add_urls(urls).await;
        }

        let samples = self.config.load_test.status_error_samples;
        let handle = self.service.load_tests().start(options.request)?;
        println!("Load test {} started", handle.test_id);

        let mut ticker = tokio::time::interval(Duration::from_secs(options.progress_interval.max(1)));
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = handle.stats.wait_terminal() => break,
                _ = ticker.tick() => {
                    let snapshot = handle.stats.snapshot(samples);
                    println!(
                        "[{}] {}: {} requests, {} errors, {:.1} req/s",
                        snapshot.test_id,
                        snapshot.status,
                        snapshot.total_requests,
                        snapshot.error_count,
                        snapshot.requests_per_second.unwrap_or(0.0)
                    );
                }
            }
        }

        let snapshot = handle.stats.snapshot(samples);
        if options.json {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        } else {
            print_snapshot(&snapshot);
        }

        match snapshot.failure_message {
            Some(message) => Err(format!("Load test failed: {message}").into()),
            None => Ok(()),
        }
    }

    pub async fn validate_config(&self, config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        println!("Validating configuration: {}", config_path.display());

        let config = Config::from_json_file(&config_path)?;
        config.validate()?;

        println!("Configuration is valid:");
        println!("  Fetch timeout: {:?}", config.fetch.timeout);
        println!("  User agent: {}", config.fetch.user_agent);
        println!(
            "  Pipeline: {} workers, queue capacity {}",
            config.pipeline.worker_count, config.pipeline.queue_capacity
        );
        println!(
            "  Fork-join: parallelism {}, batch threshold {}",
            config.fork_join.parallelism, config.fork_join.batch_threshold
        );
        println!(
            "  Load tests: at most {} concurrent",
            config.load_test.max_concurrent_tests
        );

        Ok(())
    }

    pub async fn read_urls_from_file(&self, path: &PathBuf) -> Result<Vec<String>, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path).await?;
        Ok(parse_url_list(&content))
    }
}

fn spawn_progress_reporter(tracker: Arc<ProgressTracker>, seconds: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(seconds.max(1)));

        while !tracker.is_complete() {
            interval.tick().await;
            let progress = tracker.get_progress();

            println!(
                "Progress: {}/{} ({:.1}%) - Success: {}, Errors: {}, Rate: {:.1}/s, ETA: {}",
                progress.completed,
                progress.total,
                (progress.completed as f64 / progress.total.max(1) as f64) * 100.0,
                progress.success,
                progress.errors,
                progress.rate,
                progress.eta.map(format_duration).unwrap_or_else(|| "-".to_string())
            );
        }
    });
}

fn print_items(items: &[&ItemResult]) {
    for item in items {
        if item.success {
            let found: Vec<String> = item
                .findings
                .contacts()
                .map(|(kind, _)| kind.to_string())
                .collect();
            println!(
                "  OK   {} ({} ms) {}",
                item.address,
                item.response_time_ms,
                found.join(", ")
            );
        } else {
            warn!("Failed {}: {}", item.address, item.error.as_deref().unwrap_or("unknown error"));
            println!("  FAIL {} ({})", item.address, item.status_code);
        }
    }
}

fn print_aggregate(aggregate: &BatchAggregate, elapsed: Duration) {
    println!("Processing completed in {}:", format_duration(elapsed));
    println!("  Processed: {}", aggregate.processed_count);
    println!(
        "  Successful: {} ({})",
        aggregate.success_count,
        format_rate(aggregate.success_rate())
    );
    println!("  Failed: {}", aggregate.failure_count());
    if let Some(average) = aggregate.average_response_time_ms() {
        println!("  Average response time: {average:.1} ms");
    }
    println!(
        "  Found: {} emails, {} phones, {} addresses, {} working hours",
        aggregate.emails_found,
        aggregate.phones_found,
        aggregate.addresses_found,
        aggregate.working_hours_found
    );
}

fn print_snapshot(snapshot: &LoadTestSnapshot) {
    println!("Load test {} {}:", snapshot.test_id, snapshot.status);
    println!("  Type: {}", snapshot.test_type);
    println!("  Workers: {}", snapshot.thread_count);
    println!("  Targets: {}", snapshot.target_count);
    println!(
        "  Requests: {} ({} ok, {} errors, {})",
        snapshot.total_requests,
        snapshot.success_count,
        snapshot.error_count,
        format_rate(snapshot.error_rate)
    );
    if let Some(average) = snapshot.average_response_time_ms {
        println!("  Average response time: {average:.1} ms");
    }
    if let Some(rps) = snapshot.requests_per_second {
        println!("  Throughput: {rps:.1} req/s");
    }
    for error in &snapshot.recent_errors {
        println!("  Error: {error}");
    }
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}
