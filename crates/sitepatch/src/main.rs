use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use sitepatch_core::config::{load_config, load_rules_file};
use sitepatch_core::engine::{PatchOptions, run_patch};
use sitepatch_core::report::RunSummary;
use sitepatch_core::rules::RuleSet;
use sitepatch_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, inspect_runtime, resolve_paths,
};
use sitepatch_core::sitemap::{SitemapOptions, build_sitemap};
use sitepatch_core::walker::{WalkEvent, walk_documents};

#[derive(Debug, Parser)]
#[command(
    name = "sitepatch",
    version,
    about = "Idempotent bulk patching and sitemap generation for a static site corpus"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Apply(ApplyArgs),
    Sitemap(SitemapArgs),
    Status,
}

#[derive(Debug, Args)]
struct ApplyArgs {
    #[arg(long, help = "Report changes without writing any file")]
    dry_run: bool,
    #[arg(long, help = "Include unified diff previews for changed documents")]
    diff: bool,
    #[arg(long, value_name = "PATH", help = "Load the rule catalog from a separate TOML file")]
    rules: Option<PathBuf>,
    #[arg(long, help = "Print the run summary as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct SitemapArgs {
    #[arg(long, value_name = "URL", help = "Base URL for sitemap locations")]
    base_url: Option<String>,
    #[arg(long, value_name = "PATH", help = "Where to write the sitemap")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Commands::Apply(args) => run_apply(&runtime, args),
        Commands::Sitemap(args) => run_sitemap(&runtime, args),
        Commands::Status => run_status(&runtime),
    }
}

fn run_apply(runtime: &RuntimeOptions, args: ApplyArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;

    let specs = match &args.rules {
        Some(rules_path) => load_rules_file(rules_path)?,
        None => config.rules.clone(),
    };
    if specs.is_empty() {
        bail!(
            "no rules to apply; declare [[rules]] in {} or pass --rules",
            normalize_path(&paths.config_path)
        );
    }
    let rules = RuleSet::from_specs(specs)?;

    let walk = config.walk_options(&paths.project_root);
    let options = PatchOptions {
        dry_run: args.dry_run,
        show_diff: args.diff,
    };
    let summary = run_patch(&walk, &rules, &options)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("apply{}", if args.dry_run { " (dry run)" } else { "" });
        println!("project_root: {}", normalize_path(&paths.project_root));
        println!("rules: {}", rules.len());
        print_summary(&summary);
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_sitemap(runtime: &RuntimeOptions, args: SitemapArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;

    let Some(base_url) = args.base_url.or_else(|| config.base_url()) else {
        bail!(
            "no base URL configured; pass --base-url, set SITEPATCH_BASE_URL, \
             or add [site].base_url to {}",
            normalize_path(&paths.config_path)
        );
    };
    let output = args
        .output
        .map(|output| absolutize(&output, &paths.project_root))
        .unwrap_or_else(|| config.sitemap_output_path(&paths.project_root));

    let walk = config.walk_options(&paths.project_root);
    let options = SitemapOptions {
        base_url,
        changefreq: config.sitemap.changefreq.clone(),
        priority: config.sitemap.priority.clone(),
    };
    let report = build_sitemap(&walk, &options, &output)?;

    println!("sitemap");
    println!("output: {}", normalize_path(&report.output));
    println!("entries: {}", report.entries);
    println!("duplicates: {}", report.duplicates);
    println!("walk_errors: {}", report.walk_errors);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths);
    let config = load_config(&paths.config_path)?;

    println!("runtime status");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!(
        "project_root_exists: {}",
        format_flag(status.project_root_exists)
    );
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("rules: {}", config.rules.len());
    println!(
        "base_url: {}",
        config.base_url().as_deref().unwrap_or("<none>")
    );

    if status.project_root_exists {
        let walk = config.walk_options(&paths.project_root);
        let mut documents = 0usize;
        let mut failed = 0usize;
        for event in walk_documents(&walk) {
            match event {
                WalkEvent::Document { .. } => documents += 1,
                WalkEvent::Failed { .. } => failed += 1,
            }
        }
        println!("corpus.documents: {documents}");
        println!("corpus.walk_errors: {failed}");
    }

    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("scanned: {}", summary.scanned);
    println!("changed: {}", summary.changed);
    println!("unchanged: {}", summary.unchanged);
    println!("errored: {}", summary.errored);
    println!("rule_skips: {}", summary.rule_skips);
    if !summary.changed_sample.is_empty() {
        println!("changed_sample:");
        for path in &summary.changed_sample {
            println!("  - {path}");
        }
    }
    if !summary.errored_sample.is_empty() {
        println!("errors:");
        for detail in &summary.errored_sample {
            println!("  - {detail}");
        }
    }
    if !summary.rule_skip_sample.is_empty() {
        println!("rule_skips_sample:");
        for detail in &summary.rule_skip_sample {
            println!("  - {detail}");
        }
    }
    for preview in &summary.diff_previews {
        println!("\n{preview}");
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
