// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Pistin - Browser-Verified XSS Validator
 * Standalone CLI for payload injection and execution verification
 *
 * Features:
 * - Real-browser execution proof (dialogs, DOM mutations, network egress)
 * - Context-aware smart payload selection
 * - Payload effectiveness tracking across runs
 * - Result caching keyed by canonical test fingerprints
 * - Named browser sessions with storage-state persistence
 * - HTTP validation endpoint for Burp integration
 *
 * (c) 2026 Bountyy Oy
 */

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use pistin::api::{self, ApiConfig, ApiState};
use pistin::browser::driver::CdpLauncher;
use pistin::browser::session::SessionManager;
use pistin::cache::ResultCache;
use pistin::config::{self, DetectOptions};
use pistin::crawler::{self, CrawlOptions};
use pistin::detector::XssDetector;
use pistin::effectiveness::EffectivenessStore;
use pistin::payloads::{self, GeneratorOptions};
use pistin::reporting;
use pistin::scheduler::{self, DetectJob, ParallelOptions};
use pistin::types::{AttributeKind, BrowserEngine, CancelToken, InjectionContext, PayloadSet};

/// Pistin - Browser-Verified XSS Validator
#[derive(Parser)]
#[command(name = "pistin")]
#[command(author = "Bountyy Oy <info@bountyy.fi>")]
#[command(version)]
#[command(about = "XSS detection with real-browser execution proof.", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Test one input field on a target page
    Detect {
        /// Target URL (absolute http/https)
        url: String,

        /// CSS selector of the input field
        selector: String,

        /// Browser engine: chromium, firefox, webkit
        #[arg(short, long)]
        browser: Option<String>,

        /// Submit button selector (first submission strategy)
        #[arg(long)]
        submit_selector: Option<String>,

        /// Individual payloads to test (repeatable)
        #[arg(short, long)]
        payload: Vec<String>,

        /// Payload corpus file: flat JSON array or categorized records
        #[arg(long)]
        payloads_file: Option<PathBuf>,

        /// Skip JavaScript execution verification
        #[arg(long)]
        no_verify_execution: bool,

        /// Only report results whose execution was proven
        #[arg(long)]
        require_execution: bool,

        /// Enable context-aware smart payload selection
        #[arg(long)]
        smart: bool,

        /// Maximum payloads chosen by smart selection
        #[arg(long)]
        smart_limit: Option<usize>,

        /// Prefer historically effective payloads
        #[arg(long)]
        effective_payloads: bool,

        /// Disable effectiveness tracking
        #[arg(long)]
        no_track: bool,

        /// Enable result caching
        #[arg(long)]
        cache: bool,

        /// Cache entry max age in milliseconds (0 = forever)
        #[arg(long)]
        cache_max_age: Option<u64>,

        /// Enable retries for navigation/submission/input operations
        #[arg(long)]
        retry: bool,

        /// Maximum retry attempts
        #[arg(long)]
        retry_attempts: Option<u32>,

        /// Base retry delay in milliseconds
        #[arg(long)]
        retry_delay: Option<u64>,

        /// Navigation timeout in milliseconds
        #[arg(long)]
        navigation_timeout: Option<u64>,

        /// Whole-job ceiling in milliseconds (0 disables)
        #[arg(long)]
        global_timeout: Option<u64>,

        /// Named session to reuse across runs
        #[arg(long)]
        session: Option<String>,

        /// Restore the session's persisted storage state
        #[arg(long)]
        session_reuse: bool,

        /// Persist the session's storage state at teardown
        #[arg(long)]
        session_save: bool,

        /// Close the named session after the run
        #[arg(long)]
        session_close: bool,

        /// Report output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Report format (json)
        #[arg(short, long)]
        format: Option<String>,
    },

    /// Manage persisted defaults
    Config {
        /// Print the persisted configuration
        #[arg(long)]
        show: bool,

        /// Remove the persisted configuration
        #[arg(long)]
        reset: bool,

        /// Print the configuration file path
        #[arg(long)]
        path: bool,

        /// Merge a JSON patch file into the persisted configuration
        #[arg(long)]
        update: Option<PathBuf>,
    },

    /// Inspect or generate the payload corpus
    Payloads {
        /// Write the categorized bank to a file
        #[arg(long)]
        generate: Option<PathBuf>,

        /// Print generated payloads for a context: html, attribute, js, url, css
        #[arg(long)]
        context: Option<String>,

        /// Attribute kind: unquoted, single-quoted, double-quoted, event-handler
        #[arg(long)]
        attribute: Option<String>,

        /// Print the top-N historically effective payloads
        #[arg(long)]
        effective: Option<usize>,

        /// Browser namespace for effectiveness ranking
        #[arg(long)]
        browser: Option<String>,
    },

    /// Discover testable inputs on a page
    Crawl {
        /// Page URL to inspect
        url: String,

        /// Run detection against every discovered input
        #[arg(long)]
        test: bool,

        /// Browser engine
        #[arg(short, long)]
        browser: Option<String>,

        /// Parallel jobs when testing discoveries
        #[arg(long, default_value = "2")]
        concurrency: usize,

        /// Stop after the first verified vulnerability
        #[arg(long)]
        stop_on_first: bool,
    },

    /// Run the HTTP validation endpoint
    Serve {
        /// Listen port
        #[arg(short, long, default_value_t = api::DEFAULT_PORT)]
        port: u16,

        /// Maximum concurrently instrumented pages
        #[arg(long, default_value = "4")]
        max_pages: usize,

        /// Requests allowed per minute
        #[arg(long, default_value = "120")]
        rate_limit: u32,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.debug {
        tracing::Level::DEBUG
    } else if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("pistin-worker")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build runtime: {}", e);
            std::process::exit(1);
        }
    };

    let outcome = runtime.block_on(run(cli));
    if let Err(e) = outcome {
        error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn parse_browser(raw: &Option<String>) -> Result<Option<BrowserEngine>> {
    match raw {
        Some(name) => BrowserEngine::parse(name)
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("unknown browser '{}'", name)),
        None => Ok(None),
    }
}

fn build_detector(options: &DetectOptions) -> Result<XssDetector> {
    let data_dir = config::data_dir()?;
    let launcher = Arc::new(CdpLauncher::new());
    let sessions = Arc::new(SessionManager::new(
        launcher.clone(),
        data_dir.join("sessions"),
    ));
    let effectiveness_path = options
        .effectiveness
        .path
        .clone()
        .unwrap_or_else(|| data_dir.join("effectiveness.json"));
    let effectiveness = Arc::new(EffectivenessStore::open(effectiveness_path)?);
    let cache = Arc::new(ResultCache::new(data_dir.join("cache"))?);
    Ok(XssDetector::new(launcher, sessions, effectiveness, cache))
}

fn load_payload_input(
    inline: Vec<String>,
    file: Option<PathBuf>,
) -> Result<Option<PayloadSet>> {
    if let Some(path) = file {
        let raw = std::fs::read_to_string(&path)?;
        // categorized records first; a plain string array is the flat form
        if let Ok(categories) = payloads::parse_bank(&raw) {
            return Ok(Some(PayloadSet::Categorized(categories)));
        }
        let flat: Vec<String> = serde_json::from_str(&raw).map_err(|e| {
            anyhow::anyhow!("{} is neither categorized records nor a string array: {}", path.display(), e)
        })?;
        return Ok(Some(PayloadSet::Flat(flat)));
    }
    if !inline.is_empty() {
        return Ok(Some(PayloadSet::Flat(inline)));
    }
    Ok(None)
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Detect {
            url,
            selector,
            browser,
            submit_selector,
            payload,
            payloads_file,
            no_verify_execution,
            require_execution,
            smart,
            smart_limit,
            effective_payloads,
            no_track,
            cache,
            cache_max_age,
            retry,
            retry_attempts,
            retry_delay,
            navigation_timeout,
            global_timeout,
            session,
            session_reuse,
            session_save,
            session_close,
            output,
            format,
        } => {
            // persisted defaults < provided flags
            let mut options = config::load_persisted();
            if let Some(engine) = parse_browser(&browser)? {
                options.browser = engine;
            }
            if submit_selector.is_some() {
                options.submit_selector = submit_selector;
            }
            if no_verify_execution {
                options.verify_execution = false;
            }
            if require_execution {
                options.require_execution = true;
            }
            if smart {
                options.smart_payload_selection.enabled = true;
            }
            if let Some(limit) = smart_limit {
                options.smart_payload_selection.limit = limit;
            }
            if effective_payloads {
                options.effectiveness.use_effective_payloads = true;
            }
            if no_track {
                options.effectiveness.track = false;
            }
            if cache {
                options.cache.enabled = true;
            }
            if let Some(max_age) = cache_max_age {
                options.cache.max_age = max_age;
            }
            if retry {
                options.retry.enabled = true;
            }
            if let Some(attempts) = retry_attempts {
                options.retry.max_attempts = attempts;
            }
            if let Some(delay) = retry_delay {
                options.retry.delay_ms = delay;
            }
            if let Some(timeout) = navigation_timeout {
                options.timeouts.navigation = timeout;
            }
            if let Some(timeout) = global_timeout {
                options.timeouts.global = timeout;
            }
            if session.is_some() {
                options.session.id = session;
                options.session.reuse = session_reuse;
                options.session.save = session_save;
                options.session.close_after = session_close;
            }
            if output.is_some() {
                options.report.output_dir = output;
            }
            if let Some(format) = format {
                options.report.format = format;
            }
            options.logging.verbose = cli.verbose || cli.debug;

            let payload_input = load_payload_input(payload, payloads_file)?;
            let detector = build_detector(&options)?;

            let cancel = CancelToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupt received, finishing current payload");
                        cancel.cancel();
                    }
                });
            }

            let mut run = detector
                .detect(&url, &selector, payload_input, options.clone(), cancel)
                .await?;

            match reporting::write_report(&run, &options.report) {
                Ok(path) => run.report_paths.push(path),
                Err(e) => warn!(error = %e, "Report write failed"),
            }

            println!(
                "{} payloads tested, {} finding(s){}",
                run.payloads_tested,
                run.results.len(),
                if run.cancelled { " (cancelled)" } else { "" }
            );
            for result in &run.results {
                println!(
                    "  [{}] {}{}",
                    if result.executed {
                        "EXECUTED"
                    } else {
                        "REFLECTED"
                    },
                    result.payload,
                    if result.from_cache { " (cached)" } else { "" }
                );
            }
        }

        Commands::Config {
            show,
            reset,
            path,
            update,
        } => {
            if path {
                println!("{}", config::config_path()?.display());
            }
            if reset {
                config::reset()?;
                println!("Configuration reset to defaults");
            }
            if let Some(patch_file) = &update {
                let raw = std::fs::read_to_string(&patch_file)?;
                let patch: serde_json::Value = serde_json::from_str(&raw)?;
                let merged = config::load_persisted().merged_with_patch(&patch)?;
                config::persist(&merged)?;
                println!("Configuration updated");
            }
            if show || (!path && !reset && update.is_none()) {
                let options = config::load_persisted();
                println!("{}", serde_json::to_string_pretty(&options)?);
            }
        }

        Commands::Payloads {
            generate,
            context,
            attribute,
            effective,
            browser,
        } => {
            if let Some(path) = generate {
                payloads::write_bank(&path)?;
                println!("Categorized payload bank written to {}", path.display());
            } else if let Some(context_name) = context {
                let context = InjectionContext::parse(&context_name)
                    .ok_or_else(|| anyhow::anyhow!("unknown context '{}'", context_name))?;
                let attribute_kind = match &attribute {
                    Some(kind) => Some(
                        AttributeKind::parse(kind)
                            .ok_or_else(|| anyhow::anyhow!("unknown attribute kind '{}'", kind))?,
                    ),
                    None => None,
                };
                let generated = payloads::generate(
                    context,
                    &GeneratorOptions {
                        attribute_kind,
                        ..GeneratorOptions::default()
                    },
                );
                for payload in generated {
                    println!("{}", payload);
                }
            } else if let Some(limit) = effective {
                let engine = parse_browser(&browser)?;
                let data_dir = config::data_dir()?;
                let store = EffectivenessStore::open(data_dir.join("effectiveness.json"))?;
                let ranked = store.top_k(limit, engine).await;
                if ranked.is_empty() {
                    println!("No effectiveness data recorded yet");
                }
                for entry in ranked {
                    println!(
                        "{:.2} exec / {:.2} refl / {} tests  {}",
                        entry.score.execution_score,
                        entry.score.reflection_score,
                        entry.score.total_tests,
                        entry.payload
                    );
                }
            } else {
                for category in payloads::categorized_bank() {
                    println!("{} ({} payloads) - {}", category.name, category.payloads.len(), category.description);
                }
            }
        }

        Commands::Crawl {
            url,
            test,
            browser,
            concurrency,
            stop_on_first,
        } => {
            let engine = parse_browser(&browser)?.unwrap_or_default();
            let launcher: Arc<dyn pistin::browser::driver::EngineLauncher> =
                Arc::new(CdpLauncher::new());
            let targets = crawler::discover_targets(
                &launcher,
                &url,
                &CrawlOptions {
                    browser: engine,
                    ..CrawlOptions::default()
                },
            )
            .await?;

            println!("{}", serde_json::to_string_pretty(&targets)?);

            if test && !targets.is_empty() {
                let mut options = config::load_persisted();
                options.browser = engine;
                let detector = build_detector(&options)?;

                let jobs: Vec<DetectJob> = targets
                    .into_iter()
                    .map(|target| DetectJob {
                        url: target.url,
                        selector: target.selector,
                        submit_selector: target.submit_selector,
                        payloads: None,
                    })
                    .collect();

                let outcomes = scheduler::run_parallel(
                    &detector,
                    jobs,
                    ParallelOptions {
                        concurrency,
                        stop_on_first_vulnerability: stop_on_first,
                        share_session: true,
                        base: options,
                    },
                    CancelToken::new(),
                )
                .await;

                for outcome in &outcomes {
                    match &outcome.outcome {
                        Ok(run) => println!(
                            "{} {} -> {} finding(s)",
                            outcome.url,
                            outcome.selector,
                            run.results.len()
                        ),
                        Err(e) => println!("{} {} -> error: {}", outcome.url, outcome.selector, e),
                    }
                }
            }
        }

        Commands::Serve {
            port,
            max_pages,
            rate_limit,
        } => {
            let defaults = config::load_persisted();
            let state = Arc::new(ApiState::new(
                Arc::new(CdpLauncher::new()),
                defaults,
                ApiConfig {
                    port,
                    max_concurrent_pages: max_pages,
                    rate_limit_per_minute: rate_limit,
                },
            ));
            info!(port = port, "Starting validation endpoint");
            api::serve(state).await?;
        }
    }

    Ok(())
}
