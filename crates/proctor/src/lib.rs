//! In-process harness front-end for the proctor execution engine
//!
//! A proctor test binary registers its suites in a
//! [`Registry`](proctor_core::registry::Registry) and hands them to this
//! crate, which parses harness arguments, resolves configuration, plans
//! and executes the run, and reports results:
//!
//! ```no_run
//! use proctor_core::registry::Registry;
//!
//! fn suites() -> Registry {
//!     Registry::builder().build() // register fixtures here
//! }
//!
//! fn main() {
//!     proctor::main(suites());
//! }
//! ```
//!
//! Test discovery from compiled binaries is deliberately out of scope:
//! registration is explicit, so the front-end links into the user's own
//! binary instead of shipping one.

pub mod cli;
pub mod report;
pub mod runner;

pub use cli::HarnessArgs;
pub use runner::{CompletedTest, RunSummary};

use anyhow::Result;
use proctor_core::config::RunConfig;
use proctor_core::metadata::MetadataProvider;
use proctor_core::registry::Registry;
use proctor_core::resolver::MarkerResolver;
use std::sync::Arc;
use tracing::debug;

/// Run the registered suites under the given arguments and return the
/// process exit code (0 success, 1 test failures, 2 usage/config errors).
pub fn run_suite(registry: Registry, args: HarnessArgs) -> Result<i32> {
    if let Some(level) = args.log_level {
        std::env::set_var("PROCTOR_LOG", level.as_filter());
    }
    proctor_core::logging::init(Some(args.log_format.as_str()))?;

    let config = resolve_config(&args)?;
    debug!(?config, "Resolved run configuration");

    let registry = Arc::new(registry);
    let resolver = MarkerResolver::new(Arc::clone(&registry) as Arc<dyn MetadataProvider>);
    let planned = runner::plan(&registry, &resolver, &args)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if args.list {
        report::print_list(&mut out, &planned)?;
        return Ok(0);
    }

    let summary = runner::execute(planned, &resolver, &config);
    match args.output_format {
        cli::OutputFormat::Text => report::print_text(&mut out, &summary)?,
        cli::OutputFormat::Json => report::print_json(&mut out, &summary)?,
    }
    Ok(summary.exit_code())
}

/// Entry point for a test binary: parse `std::env::args`, run, exit.
pub fn main(registry: Registry) -> ! {
    let args = match HarnessArgs::parse_from_args(std::env::args()) {
        Ok(args) => args,
        Err(e) => {
            // clap renders its own help/usage output
            let _ = e.print();
            std::process::exit(2);
        }
    };
    match run_suite(registry, args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("proctor: {:#}", e);
            std::process::exit(2);
        }
    }
}

fn resolve_config(args: &HarnessArgs) -> Result<RunConfig> {
    let base = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    let mut config = base.with_env_overrides();
    if let Some(workers) = args.workers {
        config.workers = Some(workers);
    }
    if args.fail_fast {
        config.fail_fast = true;
    }
    config.validate()?;
    Ok(config)
}
