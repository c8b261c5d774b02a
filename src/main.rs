//! Vigil CLI - run validations and inspect their results.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use vigil::prelude::*;

/// Parsed command line.
struct Args {
    config: Option<PathBuf>,
    plan: Option<String>,
    command: String,
    target: Option<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let argv: Vec<String> = std::env::args().collect();
    let program = argv.first().map(String::as_str).unwrap_or("vigil").to_string();

    let args = match parse_args(&argv[1.min(argv.len())..]) {
        Ok(Some(args)) => args,
        Ok(None) => {
            print_usage(&program);
            return;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage(&program);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn print_usage(program: &str) {
    println!("Vigil v{}", vigil::VERSION);
    println!();
    println!("Usage: {} [--config <file>] <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  validations              List all validations");
    println!("  stages                   List all stages");
    println!("  show <id>                Show one validation");
    println!("  stage <id>               Show one stage");
    println!("  run <id>                 Run a validation and wait for its result");
    println!("  run-stage <id>           Run every validation of a stage and wait");
    println!("  results                  List stored results");
    println!("  help                     Show this help message");
    println!();
    println!("Options:");
    println!("  --config <file>   Engine configuration (TOML)");
    println!("  --plan <id>       Plan to run or report against");
}

fn parse_args(args: &[String]) -> Result<Option<Args>> {
    let mut parsed = Args {
        config: None,
        plan: None,
        command: String::new(),
        target: None,
    };

    let mut positional = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "--plan" => {
                let value = args
                    .get(i + 1)
                    .with_context(|| format!("{} needs a value", args[i]))?;
                if args[i] == "--config" {
                    parsed.config = Some(PathBuf::from(value));
                } else {
                    parsed.plan = Some(value.clone());
                }
                i += 2;
            }
            "help" | "--help" | "-h" => return Ok(None),
            flag if flag.starts_with("--") => bail!("unknown option: {}", flag),
            value => {
                positional.push(value.to_string());
                i += 1;
            }
        }
    }

    let mut positional = positional.into_iter();
    parsed.command = match positional.next() {
        Some(command) => command,
        None => return Ok(None),
    };
    parsed.target = positional.next();
    if let Some(extra) = positional.next() {
        bail!("unexpected argument: {}", extra);
    }
    Ok(Some(parsed))
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let catalog = Catalog::from_config(&config).context("cannot load the validation catalog")?;
    let output = execute(&catalog, &args)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Run one command against the catalog.
///
/// Runs are always waited for: the process owns the worker threads, so
/// exiting early would leave their results `running`.
fn execute(catalog: &Catalog, args: &Args) -> Result<Value> {
    let plan = args.plan.as_deref();
    let target = || {
        args.target
            .as_deref()
            .with_context(|| format!("'{}' needs an id", args.command))
    };

    let output = match args.command.as_str() {
        "validations" => serde_json::to_value(catalog.validation_views(plan)?)?,
        "stages" => serde_json::to_value(catalog.stage_views(plan)?)?,
        "show" => {
            let validation = catalog.get_validation(target()?)?;
            serde_json::to_value(ValidationView::build(validation, plan)?)?
        }
        "stage" => {
            let stage = catalog.get_stage(target()?)?;
            serde_json::to_value(StageView::build(stage, catalog, plan)?)?
        }
        "run" => {
            let validation = catalog.get_validation(target()?)?;
            let result_id = validation.run(plan)?;
            validation.wait(plan)?;
            serde_json::to_value(ResultView::from(&catalog.result(&result_id.to_string())?))?
        }
        "run-stage" => {
            let stage = catalog.get_stage(target()?)?;
            let summary = stage.run(catalog, plan)?;
            stage.wait(catalog, plan)?;
            let failed: Vec<_> = summary
                .failed
                .iter()
                .map(|(id, e)| {
                    json!({ "validation": id, "error": e.to_string(), "kind": e.kind() })
                })
                .collect();
            json!({
                "stage": StageView::build(stage, catalog, plan)?,
                "failed": failed,
            })
        }
        "results" => {
            let results: Vec<ResultView> =
                catalog.results(plan)?.iter().map(ResultView::from).collect();
            serde_json::to_value(results)?
        }
        other => bail!("unknown command: {}", other),
    };
    Ok(output)
}
