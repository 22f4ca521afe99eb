use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use textgen_core::{
    Client,
    config::{ClientConfig, FileConfig},
    http_client::RequestCtx,
    model::{CLAUDE_V2, CompleteRequest},
    prompt::prompt_from_string,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "textgen CLI smoke tool", long_about = None)]
struct Cli {
    /// JSON or TOML config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a completion request and print the result
    Complete {
        #[arg(long, default_value = CLAUDE_V2)]
        model: String,
        #[arg(short, long, help = "Question from the user")]
        prompt: String,
        #[arg(long, default_value_t = 256)]
        max_tokens: u32,
    },
    /// Stream a completion (prints deltas live, Ctrl-C cancels)
    Stream {
        #[arg(long, default_value = CLAUDE_V2)]
        model: String,
        #[arg(short, long, help = "Question from the user")]
        prompt: String,
        #[arg(long, default_value_t = 256)]
        max_tokens: u32,
    },
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<ClientConfig> {
    match path {
        Some(p) => Ok(FileConfig::from_path(p)?.into_client_config()?),
        None => {
            let key = std::env::var("ANTHROPIC_API_KEY")
                .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY is not set"))?;
            Ok(ClientConfig::new(key))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let client = Client::with_config(load_config(cli.config)?)?;

    match cli.command {
        Commands::Complete { model, prompt, max_tokens } => {
            let req = CompleteRequest::new(model, prompt_from_string(&prompt), max_tokens);
            let resp = client.create_complete(req, &RequestCtx::default()).await?;
            println!("{}", resp.completion.trim_start());
            eprintln!("[stop: {:?}]", resp.stop_reason);
        }
        Commands::Stream { model, prompt, max_tokens } => {
            let token = CancellationToken::new();
            {
                let token = token.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        token.cancel();
                    }
                });
            }
            let ctx = RequestCtx {
                request_id: None,
                cancel: Some(&token),
            };

            let req = CompleteRequest::new(model, prompt_from_string(&prompt), max_tokens);
            let mut stream = client.create_complete_stream(req, &ctx).await?;
            let mut stop = None;
            let outcome = loop {
                match stream.recv().await {
                    Ok(Some(delta)) => {
                        print!("{}", delta.completion);
                        io::stdout().flush().ok();
                        if delta.stop_reason.is_some() {
                            stop = delta.stop_reason;
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                }
            };
            stream.close()?;
            println!();
            match outcome {
                Ok(()) => eprintln!("[stop: {:?}]", stop),
                Err(e) => eprintln!("[error: {e}]"),
            }
        }
    }

    Ok(())
}
