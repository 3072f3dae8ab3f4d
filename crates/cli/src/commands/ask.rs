//! `parley ask`: Run a single operation from the terminal.

use anyhow::{Context, bail};
use clap::Args;
use std::sync::Arc;

use parley_config::{AppConfig, StoreBackend};
use parley_core::Error;
use parley_core::message::{ConversationId, UserId};
use parley_core::operation::{ModelParameters, OperationInput, OperationRequest, OperationResult};
use parley_core::provider::Provider;
use parley_orchestrator::Orchestrator;
use parley_providers::ScriptedProvider;

#[derive(Debug, Args)]
pub struct AskArgs {
    /// Operation to run (see `GET /v1/operations`)
    #[arg(short, long, default_value = "chat")]
    pub operation: String,

    /// The message, question, or query
    #[arg(short, long)]
    pub message: String,

    /// Continue an existing conversation
    #[arg(short, long)]
    pub conversation: Option<String>,

    /// Image reference for image_analysis
    #[arg(long)]
    pub image_url: Option<String>,

    /// Strategy attribute as key=value (repeatable), e.g. language=rust
    #[arg(short, long = "attr", value_parser = parse_attr)]
    pub attrs: Vec<(String, String)>,

    /// Acting user
    #[arg(short, long, env = "PARLEY_USER", default_value = "local")]
    pub user: String,

    /// Override the model for this request
    #[arg(long)]
    pub model: Option<String>,

    /// Override the temperature for this request
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Echo the prompt back instead of calling the upstream; nothing is persisted
    #[arg(long)]
    pub offline: bool,

    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_attr(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got `{s}`")),
    }
}

impl AskArgs {
    fn to_request(&self) -> OperationRequest {
        let mut input = OperationInput::text(self.message.clone());
        if let Some(url) = &self.image_url {
            input = input.with_image(url.clone());
        }
        for (key, value) in &self.attrs {
            input = input.with_attribute(key.clone(), value.clone());
        }

        let mut request = OperationRequest::new(UserId::from(self.user.as_str()), self.operation.clone(), input)
            .with_overrides(ModelParameters {
                model: self.model.clone(),
                temperature: self.temperature,
                max_tokens: None,
            });
        if let Some(id) = &self.conversation {
            request = request.in_conversation(ConversationId::from(id));
        }
        request
    }
}

pub async fn run(args: AskArgs) -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;

    let provider: Arc<dyn Provider> = if args.offline {
        config.store.backend = StoreBackend::Memory;
        Arc::new(ScriptedProvider::echo())
    } else {
        if !config.has_api_key() {
            eprintln!();
            eprintln!("  No API key configured.");
            eprintln!("  Set PARLEY_API_KEY (or OPENAI_API_KEY), or add api_key to:");
            eprintln!("    {}", AppConfig::config_path().display());
            eprintln!("  Use --offline to try parley without an upstream.");
            eprintln!();
            bail!("No API key found");
        }
        parley_providers::build_from_config(&config)
    };

    let store = parley_store::open_from_config(&config)
        .await
        .context("Failed to open conversation store")?;
    let search = parley_providers::build_search_from_config(&config);
    let orchestrator = Arc::new(Orchestrator::from_config(&config, provider, store, search));

    match orchestrator.execute(args.to_request()).await {
        Ok(result) if args.json => println!("{}", serde_json::to_string_pretty(&result)?),
        Ok(result) => print_result(&result),
        Err(Error::PartialSuccess {
            conversation_id,
            content,
            reason,
            ..
        }) => {
            println!("{content}");
            eprintln!();
            eprintln!("  warning: the answer was not saved to conversation {conversation_id}: {reason}");
            bail!("Response generated but not persisted");
        }
        Err(e) => return Err(e).context(format!("`{}` failed", args.operation)),
    }

    Ok(())
}

fn print_result(result: &OperationResult) {
    println!("{}", result.content);
    println!();

    if let Some(url) = result.metadata.get("video_url").and_then(|v| v.as_str()) {
        println!("  Video: {url}");
    }
    if let Some(citations) = result.metadata.get("citations").and_then(|v| v.as_array()) {
        for (i, citation) in citations.iter().enumerate() {
            if let Some(url) = citation.get("url").and_then(|u| u.as_str()) {
                println!("  [{}] {url}", i + 1);
            }
        }
    }

    println!(
        "  conversation {} · {} · {} tokens · {} attempt(s)",
        result.conversation_id, result.model, result.tokens_used, result.attempts
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        ask: AskArgs,
    }

    fn parse(args: &[&str]) -> AskArgs {
        TestCli::try_parse_from(std::iter::once("parley").chain(args.iter().copied()))
            .unwrap()
            .ask
    }

    #[test]
    fn attr_parsing() {
        assert_eq!(parse_attr("language=rust").unwrap(), ("language".into(), "rust".into()));
        assert_eq!(parse_attr("code=a=b").unwrap(), ("code".into(), "a=b".into()));
        assert!(parse_attr("novalue").is_err());
        assert!(parse_attr("=x").is_err());
    }

    #[test]
    fn defaults_to_chat_for_local_user() {
        let args = parse(&["--message", "Hello"]);
        let request = args.to_request();
        assert_eq!(request.operation, "chat");
        assert_eq!(request.user_id, UserId::from("local"));
        assert!(request.conversation_id.is_none());
        assert_eq!(request.overrides, ModelParameters::default());
    }

    #[test]
    fn request_carries_every_flag() {
        let args = parse(&[
            "--operation",
            "code_assistant",
            "-m",
            "why?",
            "--conversation",
            "c-1",
            "--attr",
            "language=rust",
            "--user",
            "alice",
            "--model",
            "gpt-4o",
            "--temperature",
            "0.1",
        ]);
        let request = args.to_request();
        assert_eq!(request.operation, "code_assistant");
        assert_eq!(request.conversation_id, Some(ConversationId::from("c-1")));
        assert_eq!(request.input.attribute_str("language"), Some("rust"));
        assert_eq!(request.overrides.model.as_deref(), Some("gpt-4o"));
        assert_eq!(request.overrides.temperature, Some(0.1));
    }

    #[test]
    fn image_url_is_attached() {
        let args = parse(&["-o", "image_analysis", "-m", "what is it", "--image-url", "https://x/y.png"]);
        assert_eq!(args.to_request().input.image_url.as_deref(), Some("https://x/y.png"));
    }
}
