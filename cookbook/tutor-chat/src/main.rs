use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tutorly::{
    open_store, AppConfig, ChatService, ImageAttachment, StudentIdentity, Tutor, TutorError,
};

#[derive(Parser)]
#[command(name = "tutor-chat")]
#[command(about = "Chat with the Tutorly homework tutor from the terminal")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Student id the conversation is stored under
    #[arg(short, long, default_value = "local-student")]
    user: String,

    /// Name used to personalise prompts
    #[arg(short, long)]
    name: Option<String>,

    /// Scope history to a single session
    #[arg(short, long)]
    session: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = AppConfig::from_env_or_file(cli.config.as_ref())?;
    tutorly::init_tracing(&cfg.logging)?;

    let tutor = Tutor::from_config(&cfg)?;
    if !tutor.has_provider() {
        tracing::warn!("no Gemini API key configured, replies come from the offline pool");
    }
    let store = open_store(&cfg.storage).await?;
    let chat = ChatService::new(tutor, store, cfg.tutor.clone());

    let mut student = StudentIdentity::new(cli.user);
    if let Some(name) = cli.name {
        student = student.with_display_name(name);
    }
    let session = cli.session.as_deref();

    println!("Ask a question. Commands: /image <path> [question], /history, /clear, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" => break,
            "/history" => {
                for exchange in chat.history(&student, session, None).await?.iter().rev() {
                    println!(
                        "[{}] you: {}",
                        exchange.created_at.format("%Y-%m-%d %H:%M"),
                        exchange.message
                    );
                    println!("tutor: {}\n", exchange.response);
                }
            }
            "/clear" => {
                let removed = chat.clear_history(&student, session).await?;
                println!("cleared {removed} exchanges");
            }
            text if text.starts_with("/image ") => {
                let rest = text.trim_start_matches("/image ").trim();
                let (path, question) = rest.split_once(' ').unwrap_or((rest, ""));
                let image = match tokio::fs::read(path)
                    .await
                    .map_err(TutorError::from)
                    .and_then(|bytes| ImageAttachment::from_upload(path, bytes))
                {
                    Ok(image) => image,
                    Err(err) => {
                        println!("{err}");
                        continue;
                    }
                };
                match chat
                    .send_message_with_image(&student, question, &image, session)
                    .await
                {
                    Ok(reply) => println!("\n{}\n", reply.response),
                    Err(err @ TutorError::MessageTooLong(_)) => println!("{err}"),
                    Err(err) => return Err(err.into()),
                }
            }
            text => match chat.send_message(&student, text, session).await {
                Ok(reply) => println!("\n{}\n", reply.response),
                Err(err @ (TutorError::EmptyMessage | TutorError::MessageTooLong(_))) => {
                    println!("{err}")
                }
                Err(err) => return Err(err.into()),
            },
        }
    }
    Ok(())
}
