use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use waav_realtime::{
    ClientConfig, RealtimeSession, StreamChunk,
    core::realtime::openai::{InputAudioTranscription, Modality},
};

/// Default audio chunk: 100ms of 24kHz mono PCM16
const DEFAULT_CHUNK_BYTES: usize = 4800;

/// WaaV Realtime - talk to a realtime model from the command line
#[derive(Parser, Debug)]
#[command(name = "waav-realtime")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one text message and print the reply
    Chat {
        /// Message text
        text: String,
    },

    /// Stream a raw PCM16 file and save the spoken reply
    Audio {
        /// Input audio (raw PCM16 little-endian, 24kHz mono)
        input: PathBuf,

        /// Where to write the reply audio
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Bytes per input_audio_buffer.append
        #[arg(long = "chunk-bytes", default_value_t = DEFAULT_CHUNK_BYTES)]
        chunk_bytes: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::from_env()?,
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, closing session");
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Commands::Chat { text } => {
            config.session.modalities = vec![Modality::Text];
            let session = connect(&config, &cancel).await?;
            let outcome = run_chat(&session, &text).await;
            session.close().await?;
            outcome?;
            report_failure(&session)
        }
        Commands::Audio {
            input,
            output,
            chunk_bytes,
        } => {
            if chunk_bytes == 0 {
                anyhow::bail!("--chunk-bytes must be greater than zero");
            }
            let audio = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;

            // The whole file is one turn, so commit it explicitly
            config.session.turn_detection = None;
            config
                .session
                .input_audio_transcription
                .get_or_insert_with(InputAudioTranscription::default);
            let session = connect(&config, &cancel).await?;
            let outcome = run_audio(&session, &audio, chunk_bytes).await;
            session.close().await?;
            let reply = outcome?;

            if let Some(path) = output {
                tokio::fs::write(&path, &reply)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Reply audio written to {} ({} bytes)", path.display(), reply.len());
            }
            report_failure(&session)
        }
    }
}

async fn connect(config: &ClientConfig, cancel: &CancellationToken) -> anyhow::Result<RealtimeSession> {
    let session = RealtimeSession::builder(config.api_key.as_str())
        .config(config.session.clone())
        .cancellation_token(cancel.clone())
        .connect()
        .await?;
    if let Some(info) = session.session_info() {
        info!("Connected to session {} ({})", info.id, info.model);
    }
    Ok(session)
}

fn take_stream(session: &RealtimeSession) -> anyhow::Result<mpsc::Receiver<StreamChunk>> {
    session
        .take_response_stream()
        .ok_or_else(|| anyhow!("response stream already taken"))
}

async fn run_chat(session: &RealtimeSession, text: &str) -> anyhow::Result<()> {
    let mut chunks = take_stream(session)?;
    session.send_text(text).await?;

    let mut stdout = std::io::stdout();
    while let Some(chunk) = chunks.recv().await {
        if let Some(delta) = &chunk.delta {
            print!("{}", delta);
            stdout.flush()?;
        }
        if !chunk.is_final() {
            for call in &chunk.tool_calls {
                println!("\n[tool call] {}({})", call.name, call.arguments);
            }
        }
        if let Some(error) = &chunk.error {
            warn!("Server reported: {}", error);
            break;
        }
        if chunk.is_final() {
            println!();
            print_summary(&chunk);
            break;
        }
    }
    Ok(())
}

async fn run_audio(
    session: &RealtimeSession,
    audio: &[u8],
    chunk_bytes: usize,
) -> anyhow::Result<Vec<u8>> {
    let mut chunks = take_stream(session)?;

    for piece in audio.chunks(chunk_bytes) {
        session.send_chunk(piece).await?;
    }
    session.end_input().await?;
    info!("Sent {} bytes of audio", audio.len());

    let mut reply = Vec::new();
    while let Some(chunk) = chunks.recv().await {
        if let Some(data) = &chunk.audio {
            reply.extend_from_slice(data);
        }
        if let Some(transcript) = &chunk.input_transcript {
            println!("You: {}", transcript);
        }
        if let Some(transcript) = &chunk.transcript {
            println!("Assistant: {}", transcript);
        }
        if let Some(error) = &chunk.error {
            warn!("Server reported: {}", error);
            break;
        }
        if chunk.is_final() {
            print_summary(&chunk);
            break;
        }
    }
    Ok(reply)
}

fn print_summary(chunk: &StreamChunk) {
    let status = chunk.finish_reason.as_deref().unwrap_or("unknown");
    match &chunk.cost {
        Some(cost) => println!(
            "[{}] {} tokens ({} in, {} cached, {} out) ${:.6}",
            status,
            chunk.token_count.unwrap_or_default(),
            cost.input_tokens,
            cost.cached_tokens,
            cost.output_tokens,
            cost.total_cost_usd
        ),
        None => println!("[{}]", status),
    }
}

fn report_failure(session: &RealtimeSession) -> anyhow::Result<()> {
    match session.error() {
        Some(error) => Err(anyhow!("Session failed: {}", error)),
        None => Ok(()),
    }
}
