//! Enactor CLI - run serverless workflow trees

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;

use enactor::config::{credentials_path, load_accounts, EngineConfig};
use enactor::error::{EnactError, FixSuggestion};
use enactor::event_log::RunKind;
use enactor::invocation::{Gateway, HttpGateway, MockGateway};
use enactor::runner::{workflow_input, Runner};
use enactor::{DataValues, ExecutionContext, WorkflowSpec};

#[derive(Parser)]
#[command(name = "enactor")]
#[command(about = "Enactor - run serverless workflows across FaaS providers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow tree
    Run {
        /// Path to the workflow tree (YAML or JSON)
        file: PathBuf,

        /// JSON object with the workflow input
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Provider credentials (properties file)
        #[arg(short, long)]
        credentials: Option<PathBuf>,

        /// Redact credential-looking values from logs
        #[arg(long)]
        hide_credentials: bool,

        /// Write the event log as JSON to this file
        #[arg(long)]
        export: Option<PathBuf>,

        /// Do not record invocation events
        #[arg(long)]
        no_log: bool,

        /// Answer every function with `{}` instead of calling it
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a workflow tree (parse only)
    Validate {
        /// Path to the workflow tree
        file: PathBuf,
    },
}

struct RunArgs {
    file: PathBuf,
    input: Option<PathBuf>,
    credentials: Option<PathBuf>,
    hide_credentials: bool,
    export: Option<PathBuf>,
    no_log: bool,
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Logs go to stderr so stdout carries only the workflow output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            file,
            input,
            credentials,
            hide_credentials,
            export,
            no_log,
            dry_run,
        } => {
            run_workflow(RunArgs {
                file,
                input,
                credentials,
                hide_credentials,
                export,
                no_log,
                dry_run,
            })
            .await
        }
        Commands::Validate { file } => validate_workflow(&file).map(|_| true),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if let Some(suggestion) = e.fix_suggestion() {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
            std::process::exit(1);
        }
    }
}

/// Returns whether the workflow succeeded
async fn run_workflow(args: RunArgs) -> Result<bool, EnactError> {
    let workflow = WorkflowSpec::from_file(&args.file)?;
    let root = workflow.build()?;

    let input = match &args.input {
        Some(path) => {
            let text = tokio::fs::read_to_string(path).await?;
            workflow_input(&workflow.name, serde_json::from_str(&text)?)?
        }
        None => DataValues::new(),
    };

    let config = EngineConfig::default().hide_credentials(args.hide_credentials);
    let accounts = load_accounts(&credentials_path(args.credentials.as_deref()));

    let gateway: Arc<dyn Gateway> = if args.dry_run {
        Arc::new(MockGateway::new())
    } else {
        Arc::new(HttpGateway::new(&config, Arc::new(accounts.clone()))?)
    };

    let mut builder = ExecutionContext::builder(gateway)
        .accounts(accounts)
        .config(config);
    if args.dry_run {
        builder = builder.run_kind(RunKind::Sim);
    }
    if !args.no_log {
        builder = builder.execution_id(Utc::now().timestamp_millis().max(0) as u64);
    }

    // Banners go to stderr; stdout carries only the output JSON
    eprintln!(
        "{} Running workflow: {}",
        "→".cyan(),
        workflow.name.cyan().bold()
    );

    let runner = Runner::new(builder.build());
    let result = runner.run(root, input).await?;

    if let Some(path) = &args.export {
        let json = serde_json::to_string_pretty(&runner.event_log().to_json())?;
        tokio::fs::write(path, json).await?;
    }

    println!("{}", serde_json::to_string_pretty(&result.output_json())?);

    if result.success {
        eprintln!(
            "\n{} Done! ({:.1}s)\n",
            "✓".green(),
            result.duration.as_secs_f32()
        );
    } else {
        eprintln!("\n{} Workflow failed\n", "✗".red());
    }
    Ok(result.success)
}

fn validate_workflow(file: &Path) -> Result<(), EnactError> {
    let workflow = WorkflowSpec::from_file(file)?;
    workflow.validate()?;

    println!(
        "{} Workflow '{}' is valid",
        "✓".green(),
        file.display()
    );
    println!("  Name: {}", workflow.name);
    println!("  Root: {}", workflow.root.name());
    println!("  Nodes: {}", workflow.root.node_count());

    Ok(())
}
