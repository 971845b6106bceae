//! TSN Compiler CLI
//!
//! Compiles a module workspace and either runs it under the VM backend or
//! dumps the requested artifacts as JSON.

use clap::{CommandFactory, Parser, ValueEnum};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;
use std::process;
use tsnc_lib::{dump, host, CompilerConfig, FsLoader, Pipeline};

// exit codes, stable across releases
const EXIT_OK: i32 = 0;
const EXIT_COMPILE_ERROR: i32 = -1;
const EXIT_UNKNOWN: i32 = -2;
const EXIT_NO_ENTRY: i32 = -3;
const EXIT_IO: i32 = -4;
const EXIT_BAD_ARGS: i32 = -5;
const EXIT_CONFIG_READ: i32 = -8;
const EXIT_CONFIG_PARSE: i32 = -9;
const EXIT_EARLY: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    None,
    Vm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    All,
    Ast,
    Funcs,
    Types,
    Code,
    Logs,
    Backend,
    Exec,
}

#[derive(Parser)]
#[command(name = "tsnc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "TSN compiler - compile and run TSN module workspaces", long_about = None)]
struct Cli {
    /// Entry module name
    #[arg(short = 's', long = "script")]
    script: Option<String>,

    /// Configuration file (JSON)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Execution backend
    #[arg(short = 'b', long = "backend", value_enum, default_value_t = Backend::Vm)]
    backend: Backend,

    /// What to produce
    #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Exec)]
    output: Output,

    /// Minify JSON dumps
    #[arg(short = 'm', long = "minified")]
    minified: bool,

    /// Verbose diagnostic logging
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Skip the optimizer
    #[arg(short = 'u', long = "unoptimized")]
    unoptimized: bool,

    /// Generate shell completions and exit
    #[arg(long = "completions", value_enum)]
    completions: Option<Shell>,
}

fn main() {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "tsnc", &mut io::stdout());
        process::exit(EXIT_EARLY);
    }

    let filter = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let Some(entry) = cli.script.clone() else {
        eprintln!("error: no entry module; pass -s <module>");
        process::exit(EXIT_BAD_ARGS);
    };

    let config = match &cli.config {
        Some(path) => {
            if !path.exists() {
                eprintln!("error: config '{}' does not exist", path.display());
                process::exit(EXIT_CONFIG_READ);
            }
            match CompilerConfig::from_file(path) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("error: {e}");
                    process::exit(EXIT_CONFIG_PARSE);
                }
            }
        }
        None => CompilerConfig::default(),
    };

    process::exit(run(&cli, &entry, &config));
}

fn run(cli: &Cli, entry: &str, config: &CompilerConfig) -> i32 {
    let loader = FsLoader {
        root: config.workspace_root.clone(),
    };
    let mut pipeline = Pipeline::new(Box::new(loader));
    pipeline.optimize = config.optimize && !cli.unoptimized;
    pipeline.max_group_iterations = config.max_group_iterations;

    // binding manifests extend the host surface before any module compiles
    for manifest in &config.host_manifests {
        let text = match std::fs::read_to_string(manifest) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("error: cannot read manifest '{}': {e}", manifest.display());
                return EXIT_IO;
            }
        };
        match host::load_manifest(&mut pipeline.ctx, &text) {
            Ok(fns) => pipeline.add_host_functions(fns),
            Err(e) => {
                eprintln!("error: {e}");
                return EXIT_IO;
            }
        }
    }

    let module = match pipeline.compile(entry) {
        Ok(id) => Some(id),
        Err(e) => {
            eprintln!("error: {e}");
            None
        }
    };

    for log_entry in pipeline.ctx.log.entries() {
        eprintln!("{log_entry}");
    }

    let dumps_requested = cli.output != Output::Exec;
    if dumps_requested {
        let mut doc = serde_json::Map::new();
        let all = cli.output == Output::All;
        if all || cli.output == Output::Ast {
            doc.extend(as_map(dump::dump_ast(&pipeline.asts)));
        }
        if all || cli.output == Output::Types {
            doc.extend(as_map(dump::dump_types(&pipeline.ctx)));
        }
        if all || cli.output == Output::Funcs {
            doc.extend(as_map(dump::dump_funcs(&pipeline.ctx)));
        }
        if all || cli.output == Output::Code {
            doc.extend(as_map(dump::dump_code(&pipeline.ctx, &pipeline.holders)));
        }
        if all || cli.output == Output::Logs {
            doc.extend(as_map(dump::dump_logs(&pipeline.ctx)));
        }
        if (all || cli.output == Output::Backend) && cli.backend == Backend::Vm {
            doc.extend(as_map(dump::dump_backend(&pipeline.backend.program)));
        }
        println!(
            "{}",
            dump::render(&serde_json::Value::Object(doc), cli.minified)
        );
    }

    if pipeline.ctx.log.has_errors() {
        return EXIT_COMPILE_ERROR;
    }
    let Some(module) = module else {
        return EXIT_COMPILE_ERROR;
    };

    if cli.output == Output::Exec || cli.output == Output::All {
        if cli.backend == Backend::None {
            return EXIT_OK;
        }
        if pipeline.entry_function(module).is_none() {
            eprintln!("error: module '{entry}' has no 'main' function");
            return EXIT_NO_ENTRY;
        }
        let vm_config = (&config.vm).into();
        match tsnc_lib::run_main_with_vm(&pipeline, module, &vm_config) {
            Ok((result, vm)) => {
                for line in &vm.output {
                    println!("{line}");
                }
                tracing::debug!(result, "main returned");
                return EXIT_OK;
            }
            Err(e) => {
                eprintln!("runtime error: {e}");
                return EXIT_UNKNOWN;
            }
        }
    }

    EXIT_OK
}

fn as_map(v: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match v {
        serde_json::Value::Object(m) => m,
        other => {
            let mut m = serde_json::Map::new();
            m.insert("value".into(), other);
            m
        }
    }
}
