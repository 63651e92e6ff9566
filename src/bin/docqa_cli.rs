use std::{fs, path::PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use docqa::{
    config, logging,
    processing::{DocumentRequest, QaService, questions::parse_questions},
};
use serde_json::json;

#[derive(Parser)]
#[command(
    name = "docqa-cli",
    about = "Answer questions about a local PDF or JSON document"
)]
struct Cli {
    /// Document to query (.pdf or .json).
    #[arg(long)]
    document: PathBuf,
    /// JSON file holding an array of questions.
    #[arg(long, conflicts_with = "question")]
    questions: Option<PathBuf>,
    /// Question to ask; repeat for several.
    #[arg(long)]
    question: Vec<String>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init_config().context("invalid configuration")?;
    logging::init_tracing();

    let questions = match &cli.questions {
        Some(path) => {
            let bytes =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            parse_questions(&bytes).with_context(|| format!("invalid {}", path.display()))?
        }
        None if cli.question.is_empty() => bail!("pass --questions <file> or --question <text>"),
        None => cli.question.clone(),
    };

    let bytes = fs::read(&cli.document)
        .with_context(|| format!("failed to read {}", cli.document.display()))?;
    let file_name = cli
        .document
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let service = QaService::from_config(config).context("failed to initialise QA service")?;
    let results = service
        .answer_document(DocumentRequest {
            file_name,
            bytes,
            questions,
        })
        .await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "results": results }))?
    );
    Ok(())
}
