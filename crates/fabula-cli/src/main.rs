//! Smoke test for the LLM gateway against real provider credentials.
//!
//! Resolves a config the same way the writing pipeline does, asks for a
//! one-sentence generation, and reports what came back. Exit codes:
//! 0 success, 2 tagged gateway error, 1 anything else.

use anyhow::Result;
use clap::Parser;
use fabula_llm::{parse_json_loose, resolve_llm_config, LlmError, LlmGateway, Secrets};
use log::LevelFilter;
use serde_json::json;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[clap(
    name = "fabula-smoke",
    version = "0.1.0",
    about = "Fabula LLM gateway smoke test"
)]
struct Cli {
    #[clap(long, default_value = "openai", help = "Provider: openai or gemini")]
    provider: String,

    #[clap(long, help = "Override the model identifier for this run")]
    model: Option<String>,

    #[clap(long, help = "Override the base URL for this run")]
    base_url: Option<String>,

    #[clap(long, default_value_t = 120)]
    max_tokens: u32,

    #[clap(long, default_value_t = 0.2)]
    temperature: f64,

    #[clap(long, default_value = "Return ONE short sentence only.")]
    system: String,

    #[clap(default_value = "Say hello in <= 20 words.")]
    prompt: String,

    #[clap(long, help = "Expect JSON output and run it through the loose parser")]
    expect_json: bool,

    #[clap(long, short, default_value = "info")]
    log_level: String,
}

async fn run(cli: &Cli) -> Result<i32> {
    let secrets = Secrets::load();
    println!("[smoke] secrets: {:?}", secrets.status());

    let mut section = serde_json::Map::new();
    if let Some(model) = &cli.model {
        section.insert("model".to_string(), json!(model));
    }
    if let Some(base_url) = &cli.base_url {
        section.insert("base_url".to_string(), json!(base_url));
    }
    let mut llm = serde_json::Map::new();
    llm.insert("provider".to_string(), json!(cli.provider));
    llm.insert("temperature".to_string(), json!(cli.temperature));
    llm.insert("max_tokens".to_string(), json!(cli.max_tokens));
    llm.insert(cli.provider.clone(), serde_json::Value::Object(section));
    let settings = json!({ "llm": llm });

    let cfg = resolve_llm_config(&settings, &secrets);
    println!(
        "[smoke] provider={} model={} base_url={}",
        cfg.provider.as_str(),
        cfg.model,
        cfg.base_url
    );

    let gateway = LlmGateway::new();
    match gateway.generate_text(&cli.system, &cli.prompt, &cfg).await {
        Ok(text) => {
            let t = text.trim();
            let head: String = t.chars().take(80).collect();
            println!("[smoke] output_len={} head={:?}", t.chars().count(), head);
            if cli.expect_json {
                match parse_json_loose(t) {
                    Ok(value) => println!("[smoke] parsed_json={}", value),
                    Err(e) => {
                        println!("[smoke] loose parse failed: {}", e);
                        return Ok(2);
                    }
                }
            }
            Ok(0)
        }
        Err(LlmError::Generation(tag)) => {
            println!("[smoke] generation failed: {}", tag);
            Ok(2)
        }
        Err(e) => {
            println!("[smoke] error: {}", e);
            Ok(1)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = LevelFilter::from_str(&cli.log_level).unwrap_or(LevelFilter::Info);
    env_logger::Builder::new().filter_level(level).init();

    let code = run(&cli).await?;
    std::process::exit(code);
}
