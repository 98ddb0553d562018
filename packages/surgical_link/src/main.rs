use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use surgical_link::config::{FileConfig, default_config_path, load_config};
use surgical_link::{
    AgentResponse, ApiClient, SendOutcome, ServerAction, Session, Settings, StillImageSource,
};

#[derive(Parser)]
#[command(name = "surgical-link")]
#[command(about = "Console client for the surgical video annotation assistant")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to <config dir>/surgical_link/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Origin of the assistant's web front-end, e.g. http://localhost:8050
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat over the control channel, one message per stdin line (default)
    Chat(ChatArgs),

    /// List videos known to the backend
    Videos {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Make the backend play a previously uploaded video
    Select { filename: String },

    /// Upload a video file
    Upload { path: PathBuf },
}

#[derive(Parser, Default)]
struct ChatArgs {
    /// Still image standing in for the video player
    #[arg(long)]
    frame: Option<PathBuf>,

    /// Send a frame to the annotation agent every capture interval
    #[arg(long)]
    auto_capture: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config_path = cli.config.clone().or_else(default_config_path);
    let mut file_config: FileConfig = load_config(config_path.as_deref())
        .extract()
        .context("Failed to load configuration")?;
    if let Some(origin) = cli.origin {
        file_config.endpoint.origin = origin;
    }
    let settings = Settings::from_file(&file_config)?;

    match cli.command {
        None => chat(settings, ChatArgs::default()).await,
        Some(Commands::Chat(args)) => chat(settings, args).await,
        Some(Commands::Videos { json }) => list_videos(settings, json).await,
        Some(Commands::Select { filename }) => {
            let selection = ApiClient::new(settings.origin)
                .select_video(&filename)
                .await?;
            println!("now playing {}", selection.video_src);
            Ok(())
        }
        Some(Commands::Upload { path }) => {
            let stored = ApiClient::new(settings.origin).upload_video(&path).await?;
            println!(
                "uploaded as {}",
                stored.filename.as_deref().unwrap_or(&stored.video_src)
            );
            Ok(())
        }
    }
}

fn init_logging(debug: bool) {
    let default_directive = if debug {
        "surgical_link=debug,info"
    } else {
        "surgical_link=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

async fn list_videos(settings: Settings, json: bool) -> Result<()> {
    let videos = ApiClient::new(settings.origin).list_videos().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&videos)?);
        return Ok(());
    }
    if videos.is_empty() {
        println!("no videos uploaded");
    }
    for video in videos {
        println!("{:<40} {:>12} bytes", video.filename, video.size);
    }
    Ok(())
}

async fn chat(settings: Settings, args: ChatArgs) -> Result<()> {
    let session = Session::new(&settings);

    if let Some(path) = &args.frame {
        let source = StillImageSource::open(path)?;
        session.attach_media(Box::new(source)).await;
        info!("using {} as the current frame", path.display());
    }

    session.connect_with_reactions(print_action);
    if args.auto_capture {
        session.start_periodic_capture().await;
    }

    eprintln!("type a message and press enter; /note <text> saves a note, /reconnect retries");

    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let result = chat_loop(&session, BufReader::new(tokio::io::stdin()), interrupted).await;

    session.close().await;
    result
}

/// Feed input lines to the session until EOF, the control channel goes away
/// or `shutdown` resolves.
async fn chat_loop<R>(session: &Session, input: R, shutdown: impl Future<Output = ()>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut status = session.connection().subscribe_status();
    let mut lines = input.lines();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                handle_line(&session, line.trim()).await;
            }

            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                if status.borrow_and_update().gave_up {
                    warn!("gave up reconnecting to the assistant; type /reconnect to try again");
                }
            }

            () = &mut shutdown => {
                info!("interrupted");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_line(session: &Session, line: &str) {
    if line.is_empty() {
        return;
    }

    let outcome = if line == "/reconnect" {
        session.connect_with_reactions(print_action);
        return;
    } else if let Some(content) = line.strip_prefix("/note ") {
        session
            .send_note(json!({
                "title": "Note",
                "content": content.trim(),
            }))
            .await
    } else {
        session.send_user_text(line).await
    };

    if outcome == SendOutcome::Dropped {
        eprintln!("(not connected, message dropped)");
    }
}

fn print_action(action: &ServerAction) {
    match action {
        ServerAction::RecognizedSpeech { text } => println!("you (voice): {text}"),
        ServerAction::ChatReply { text } => println!("assistant: {text}"),
        ServerAction::AgentResponse(AgentResponse { text, is_note, .. }) => {
            if *is_note {
                println!("note: {text}");
            } else {
                println!("assistant: {text}");
            }
        }
        ServerAction::Annotation(annotation) => println!("annotation: {annotation}"),
        ServerAction::Note(note) => println!("note: {note}"),
        ServerAction::PhaseChanged { phase } => println!("phase: {phase}"),
        ServerAction::VideoUpdated { src } => println!("video: {src}"),
        ServerAction::FrameRequested { .. } => info!("frame requested by assistant"),
        ServerAction::Text(text) => println!("{text}"),
    }
}
