use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sense_client::config::{load_config, SenseConfig, DEFAULT_HOST, HOST_VAR};
use sense_client::task::{file_task_names, subtask_names, StreamTask};
use sense_client::SenseClient;
use std::path::{Path, PathBuf};
use strum::IntoEnumIterator;

#[derive(Parser, Debug)]
#[command(name = "sense")]
#[command(about = "Classify audio files and live microphone audio with the Sense service")]
#[command(long_about = "
Client for the Sense audio classification service.

The API key is read from COCHLEAR_SENSE_API_KEY (a .env file works too) and the
server address from COCHLEAR_SENSE_HOST.

EXAMPLES:
  # Show the available tasks
  sense tasks

  # Detect a baby crying in a recording
  sense file recording.wav --task event --subtask babycry

  # Find an input device, then classify live audio from it
  sense devices
  sense stream --task music_genre_stream --device \"USB Audio\"
")]
struct Args {
    /// Server address (host:port), overrides COCHLEAR_SENSE_HOST
    #[arg(long, global = true)]
    host: Option<String>,

    /// API key, overrides COCHLEAR_SENSE_API_KEY
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tasks, subtasks and live capture rates
    Tasks,

    /// Classify a whole audio file
    File {
        path: PathBuf,

        #[arg(long)]
        task: String,

        /// Event category, required for the event task
        #[arg(long)]
        subtask: Option<String>,

        /// Container format, defaults to the file extension
        #[arg(long)]
        format: Option<String>,
    },

    /// Classify live audio from an input device until Ctrl+C
    Stream {
        #[arg(long)]
        task: String,

        /// Event category, required for event_stream
        #[arg(long)]
        subtask: Option<String>,

        /// Input device name (default input device if omitted), see `sense devices`
        #[arg(long)]
        device: Option<String>,
    },

    /// List input devices usable for live capture
    #[cfg(feature = "microphone")]
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Tasks => {
            print_tasks();
            Ok(())
        }
        Command::File {
            path,
            task,
            subtask,
            format,
        } => {
            let format = match format {
                Some(format) => format,
                None => format_from_extension(&path)?,
            };
            let mut client = connect(args.host, args.api_key).await?;
            let prediction = client
                .classify_file(&path, &format, &task, subtask.as_deref())
                .await
                .with_context(|| format!("Failed to classify {}", path.display()))?;
            println!("{}", prediction);
            Ok(())
        }
        Command::Stream {
            task,
            subtask,
            device,
        } => run_stream(args.host, args.api_key, &task, subtask.as_deref(), device).await,
        #[cfg(feature = "microphone")]
        Command::Devices => list_devices(),
    }
}

async fn connect(host: Option<String>, api_key: Option<String>) -> Result<SenseClient> {
    let config = match load_config() {
        Ok(config) => config.with_overrides(host, api_key),
        // A key on the command line is enough
        Err(_) if api_key.is_some() => SenseConfig::new(
            host.or_else(|| std::env::var(HOST_VAR).ok())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            api_key.unwrap_or_default(),
        ),
        Err(e) => return Err(e).context("Failed to load configuration"),
    };

    SenseClient::connect(config)
        .await
        .context("Failed to connect to the Sense service")
}

#[cfg(feature = "microphone")]
async fn run_stream(
    host: Option<String>,
    api_key: Option<String>,
    task: &str,
    subtask: Option<&str>,
    device: Option<String>,
) -> Result<()> {
    use futures_util::StreamExt;
    use sense_client::capture::CaptureSession;

    let mut client = connect(host, api_key).await?;
    let mut session = CaptureSession::open_microphone(task, device)
        .context("Failed to open capture session")?;
    let mut predictions = client
        .sense_stream(&mut session, subtask)
        .await
        .context("Failed to start stream")?;

    println!("🎧 Listening ({}Hz)...", session.config().sample_rate);
    println!("   Press Ctrl+C to exit");

    loop {
        tokio::select! {
            prediction = predictions.next() => {
                match prediction {
                    Some(Ok(prediction)) => println!("{}", prediction),
                    Some(Err(e)) => {
                        log::error!("Stream failed: {}", e);
                        return Err(e.into());
                    }
                    None => {
                        log::info!("Server closed the stream");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    session.close();
    println!("\n👋 Goodbye!");
    Ok(())
}

#[cfg(not(feature = "microphone"))]
async fn run_stream(
    _host: Option<String>,
    _api_key: Option<String>,
    _task: &str,
    _subtask: Option<&str>,
    _device: Option<String>,
) -> Result<()> {
    anyhow::bail!("Live capture needs the `microphone` feature (cargo build --features microphone)")
}

#[cfg(feature = "microphone")]
fn list_devices() -> Result<()> {
    let devices =
        sense_client::capture::list_input_devices().context("Failed to list input devices")?;

    println!("🎤 Available Input Devices:");
    println!("==========================");
    if devices.is_empty() {
        println!("  No input devices found");
    }
    for (i, device) in devices.iter().enumerate() {
        let default_marker = if device.is_default { " (default)" } else { "" };
        println!(
            "  {}. {}{} - {} channels @ {}Hz",
            i + 1,
            device.name,
            default_marker,
            device.channel_count,
            device.sample_rate
        );
    }
    Ok(())
}

fn format_from_extension(path: &Path) -> Result<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .with_context(|| {
            format!(
                "Cannot tell the format of {}, pass --format",
                path.display()
            )
        })
}

fn print_tasks() {
    println!("📁 File tasks:");
    for name in file_task_names() {
        println!("  {}", name);
    }

    println!("\n📡 Stream tasks:");
    for task in StreamTask::iter() {
        println!("  {:<24} {}Hz", task.as_str(), task.sample_rate());
    }

    println!("\n🏷️  Event subtasks (event, event_stream):");
    for name in subtask_names() {
        println!("  {}", name);
    }
}
