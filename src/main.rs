use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};
use tfgraph::config::{self, Config as TfgraphConfig};
use tfgraph::modules::{ModuleResolver, ResolverOptions};
use tfgraph::{parse_project, EvalMode, FsLoader, ParseOptions, ProjectLocator};

#[derive(Parser)]
#[command(name = "tfgraph")]
#[command(about = "Evaluate Terraform-style configuration into fully-valued blocks", long_about = None)]
struct Cli {
    /// Settings file (default: tfgraph.toml, ignored when missing)
    #[arg(long, global = true, default_value = config::CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct EvalArgs {
    /// Project directory
    #[arg(value_name = "PATH", default_value = ".")]
    path: PathBuf,

    /// Project name from tfgraph.toml, used instead of PATH
    #[arg(long)]
    project: Option<String>,

    /// Set a variable: --var key=value (repeatable)
    #[arg(long, value_parser = parse_key_val::<String, String>)]
    var: Vec<(String, String)>,

    /// Load variables from a .tfvars file. Can repeat.
    #[arg(long)]
    var_file: Vec<PathBuf>,

    #[arg(long, value_enum)]
    mode: Option<EvalMode>,

    #[arg(long)]
    max_iterations: Option<usize>,

    #[arg(long)]
    workspace: Option<String>,

    /// Fail on the first file that does not parse
    #[arg(long)]
    stop_on_error: bool,

    /// Only use modules already recorded in the manifest
    #[arg(long)]
    no_resolve: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a project and print the block tree as JSON
    Eval(EvalArgs),
    /// List project roots below a directory
    Locate {
        #[arg(value_name = "PATH", default_value = ".")]
        path: PathBuf,
        /// Treat every directory with configuration files as a project
        #[arg(long)]
        all_paths: bool,
        /// Skip directories matching this glob (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
    },
    /// Resolve and download module calls, then print the manifest
    Modules {
        #[arg(value_name = "PATH", default_value = ".")]
        path: PathBuf,
        /// Registry for sources without an explicit host
        #[arg(long)]
        registry_host: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings_file = config::load_config_from_path(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if settings_file.is_some() {
        info!("using settings from {}", cli.config.display());
    }
    let cfg = settings_file.unwrap_or_default();

    match cli.command {
        Commands::Eval(args) => run_eval(&cfg, &cli.config, args),
        Commands::Locate {
            path,
            all_paths,
            exclude,
        } => {
            let mut options = cfg.settings.locator_options();
            options.all_paths |= all_paths;
            options.exclude_paths.extend(exclude);
            let locator = ProjectLocator::new(&FsLoader, options)?;
            for root in locator.find_roots(&path)? {
                println!("{}", root.display());
            }
            Ok(())
        }
        Commands::Modules {
            path,
            registry_host,
        } => {
            let root = absolute(&path)?;
            let mut options = ResolverOptions {
                cache_dir: root.clone(),
                ..ResolverOptions::default()
            };
            if let Some(host) = registry_host.or(cfg.settings.registry_host.clone()) {
                options.registry_host = host;
            }
            let mut resolver = ModuleResolver::new(options)?;
            let manifest = resolver.load(&FsLoader, &root)?;
            for diagnostic in resolver.take_diagnostics() {
                warn!("{diagnostic}");
            }
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(())
        }
    }
}

fn run_eval(cfg: &TfgraphConfig, config_path: &Path, args: EvalArgs) -> Result<()> {
    let (root, mut options) = match &args.project {
        Some(name) => {
            let project = cfg
                .project(name)
                .ok_or_else(|| anyhow!("project '{}' not found in {}", name, config_path.display()))?;
            let base = config_path.parent().unwrap_or(Path::new("."));
            let (root, options) = cfg.project_options(project, base)?;
            (absolute(&root)?, options)
        }
        None => {
            let root = absolute(&args.path)?;
            let options = cfg.settings.parse_options(&root)?;
            (root, options)
        }
    };
    apply_eval_args(&mut options, &args);

    let project = parse_project(&root, &FsLoader, options)?;
    for diagnostic in project.all_diagnostics() {
        warn!("{diagnostic}");
    }
    if !project.converged {
        warn!(
            "{} did not settle after {} passes, some values may be unknown",
            root.display(),
            project.iterations_used
        );
    }

    let json = project.to_json();
    let out = if args.pretty {
        serde_json::to_string_pretty(&json)?
    } else {
        serde_json::to_string(&json)?
    };
    println!("{out}");
    Ok(())
}

fn apply_eval_args(options: &mut ParseOptions, args: &EvalArgs) {
    options.var_files.extend(args.var_file.iter().cloned());
    for (k, v) in &args.var {
        options.inputs.insert_raw(k.clone(), v);
    }
    if let Some(mode) = args.mode {
        options.mode = mode;
    }
    if let Some(max) = args.max_iterations {
        options.max_iterations = max;
    }
    if let Some(workspace) = &args.workspace {
        options.workspace = workspace.clone();
    }
    options.stop_on_error |= args.stop_on_error;
    if args.no_resolve {
        options.resolve_modules = false;
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(path
        .absolutize()
        .with_context(|| format!("resolving {}", path.display()))?
        .to_path_buf())
}

fn parse_key_val<K, V>(s: &str) -> Result<(K, V)>
where
    K: std::str::FromStr,
    V: std::str::FromStr,
    <K as std::str::FromStr>::Err: std::fmt::Display,
    <V as std::str::FromStr>::Err: std::fmt::Display,
{
    let pos = s.find('=').ok_or_else(|| anyhow!("expected key=value"))?;
    let key = s[..pos]
        .parse()
        .map_err(|e| anyhow!("failed to parse key: {}", e))?;
    let value = s[pos + 1..]
        .parse()
        .map_err(|e| anyhow!("failed to parse value: {}", e))?;
    Ok((key, value))
}
