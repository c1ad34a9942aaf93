use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use refund_assist::llm::LlmClient;
use refund_assist::llm::config::LlmConfig;
use refund_assist::llm::types::LlmError;
use refund_assist::services::tax::TAX_ASSISTANT_SYSTEM;
use refund_assist::state::error_info::ErrorInfo;
use refund_assist::state::request::RequestController;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to read {path}: {source}")]
    ReadInput { path: PathBuf, source: std::io::Error },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

#[derive(Parser, Debug)]
#[command(name = "refund-assist", about = "Tax refund assistant backed by an OpenAI-compatible API")]
struct Cli {
    /// Completion model, overriding `LLM_MODEL`.
    #[arg(long, env = "REFUND_ASSIST_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the tax assistant a question.
    Chat {
        message: String,
        /// Print the answer as it streams in.
        #[arg(long)]
        stream: bool,
    },
    /// Analyze a tax document for compliance issues.
    Analyze {
        #[arg(long, default_value = "CFDI")]
        doc_type: String,
        file: PathBuf,
    },
    /// Check refund eligibility from a JSON request file.
    Refund { file: PathBuf },
    /// Personalized recommendations from a JSON taxpayer profile.
    Recommend { file: PathBuf },
    /// Run text through the moderation endpoint.
    Moderate { text: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let controller = match build_controller(cli.model) {
        Ok(controller) => controller,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(&controller, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Llm(e)) => {
            let info = controller.state().error.unwrap_or_else(|| ErrorInfo::from(&e));
            eprintln!("{}\n{}", info.error, info.suggestion);
            tracing::debug!(error = %e, "cli: request failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn build_controller(model: Option<String>) -> Result<RequestController, LlmError> {
    let mut config = LlmConfig::from_env()?;
    if let Some(model) = model {
        config.model = model;
    }
    let llm = LlmClient::from_config(config)?;
    tracing::info!(model = llm.model(), "cli: llm client ready");
    Ok(RequestController::new(Arc::new(llm)))
}

async fn run(controller: &RequestController, command: Command) -> Result<(), CliError> {
    match command {
        Command::Chat { message, stream: true } => {
            let mut stdout = std::io::stdout();
            let result = controller
                .get_streaming_response(
                    &message,
                    |chunk| {
                        let _ = write!(stdout, "{chunk}");
                        let _ = stdout.flush();
                    },
                    TAX_ASSISTANT_SYSTEM,
                )
                .await;
            println!();
            result?;
        }
        Command::Chat { message, stream: false } => {
            let text = controller.get_chat_response(&message, TAX_ASSISTANT_SYSTEM).await?;
            println!("{text}");
        }
        Command::Analyze { doc_type, file } => {
            let content = read_input(&file)?;
            print_json(&controller.analyze_document(&content, &doc_type).await?)?;
        }
        Command::Refund { file } => {
            let data: Value = serde_json::from_str(&read_input(&file)?)?;
            print_json(&controller.get_refund_assistance(&data).await?)?;
        }
        Command::Recommend { file } => {
            let profile: Value = serde_json::from_str(&read_input(&file)?)?;
            print_json(&controller.get_personalized_recommendations(&profile).await?)?;
        }
        Command::Moderate { text } => {
            print_json(&controller.moderate_content(&text).await?)?;
        }
    }
    Ok(())
}

fn read_input(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::ReadInput { path: path.to_path_buf(), source })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
