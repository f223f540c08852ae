use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use salin::config::PlaybackConfig;
use salin::conversation::{EventSender, Role};
use salin::voice::{
    AudioBuffer, AudioCapture, CpalBackend, CpalOutput, HandleId, PlaybackListener,
    PlaybackScheduler, SegmentingRecognizer, SpeechToText, WakeWordDetector, WakeWordListener,
    list_devices,
};
use salin::{Command as SessionCommand, Config, ConversationMachine, Event, LiveConnector, Snapshot};

/// Salin - real-time voice-to-voice translation
#[derive(Parser)]
#[command(name = "salin", version, about)]
struct Cli {
    /// API key for the live translation service
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Begin in standby, listening for the wake word
    #[arg(long)]
    standby: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output through the playback scheduler
    TestSpeaker,
    /// List audio devices
    Devices,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,salin=info",
        1 => "info,salin=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::Devices => devices(),
        };
    }

    let mut config = Config::load()?;
    if let Some(key) = cli.api_key.filter(|k| !k.trim().is_empty()) {
        config.api_key = Some(key);
    }
    tracing::debug!(
        model = %config.live.model,
        voice = %config.live.voice,
        frame_size = config.capture.frame_size,
        "loaded configuration"
    );

    let wake = build_wake_listener(&config)?;
    if wake.is_none() {
        tracing::info!("wake word disabled (set OPENAI_API_KEY or DEEPGRAM_API_KEY to enable)");
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let connector = LiveConnector::new(&config);
    let machine = ConversationMachine::new(
        config,
        Box::new(CpalBackend),
        Box::new(connector),
        wake,
        tx.clone(),
    );

    tokio::spawn(render(machine.subscribe()));
    tokio::spawn(read_commands(tx.clone()));
    tokio::spawn(quit_on_ctrl_c(tx.clone()));

    if cli.standby {
        let _ = tx.send(Event::Command(SessionCommand::ToggleStandby));
    }

    println!("salin ready. Commands: start, stop, sleep, standby, dismiss, quit");
    machine.run(rx).await;

    Ok(())
}

fn build_wake_listener(config: &Config) -> anyhow::Result<Option<WakeWordListener>> {
    let Some(stt) = &config.wake.stt else {
        return Ok(None);
    };
    let detector = WakeWordDetector::new(config.wake.phrases.clone())?;
    let recognizer = SegmentingRecognizer::new(SpeechToText::new(stt)?);
    Ok(Some(WakeWordListener::new(detector, Box::new(recognizer))))
}

fn parse_command(line: &str) -> Option<SessionCommand> {
    match line.trim().to_lowercase().as_str() {
        "start" | "s" => Some(SessionCommand::Start),
        "stop" => Some(SessionCommand::Stop),
        "sleep" => Some(SessionCommand::Sleep),
        "standby" | "wake" => Some(SessionCommand::ToggleStandby),
        "dismiss" | "ok" => Some(SessionCommand::Dismiss),
        "quit" | "exit" | "q" => Some(SessionCommand::Quit),
        _ => None,
    }
}

async fn read_commands(tx: EventSender) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match parse_command(&line) {
                Some(command) => {
                    if tx.send(Event::Command(command)).is_err() {
                        return;
                    }
                }
                None => println!("unknown command: {}", line.trim()),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        }
    }
    let _ = tx.send(Event::Command(SessionCommand::Quit));
}

async fn quit_on_ctrl_c(tx: EventSender) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("interrupted, shutting down");
        let _ = tx.send(Event::Command(SessionCommand::Quit));
    }
}

/// Print state changes as they are published
async fn render(mut rx: watch::Receiver<Snapshot>) {
    let mut last = Snapshot::default();
    while rx.changed().await.is_ok() {
        let snapshot = rx.borrow_and_update().clone();

        if snapshot.phase != last.phase || snapshot.mood != last.mood {
            println!("[{}] mood: {}", snapshot.phase, snapshot.mood);
        }
        for entry in snapshot.transcript.iter().skip(last.transcript.len()) {
            let who = match entry.role {
                Role::User => "you",
                Role::Remote => "salin",
            };
            println!(
                "{} {who:>5}: {}",
                entry.created_at.format("%H:%M:%S"),
                entry.text
            );
        }
        if snapshot.error != last.error {
            if let Some(message) = &snapshot.error {
                println!("! {message} (type `start` to retry or `dismiss`)");
            }
        }

        last = snapshot;
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        capture.clear_buffer();
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: salin devices");
    println!("  3. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

struct EndedSignal(mpsc::UnboundedSender<HandleId>);

impl PlaybackListener for EndedSignal {
    fn on_ended(&self, handle: HandleId) {
        let _ = self.0.send(handle);
    }
}

/// Test speaker output with a tone split into back-to-back chunks
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    const CHUNKS: usize = 4;
    const CHUNK_SECS: f32 = 0.5;

    println!("Testing speaker output...");
    println!("You should hear an unbroken 440Hz tone for 2 seconds\n");

    let config = PlaybackConfig::default();
    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    let output = CpalOutput::open(&config, Arc::new(EndedSignal(ended_tx)))?;
    let mut scheduler = PlaybackScheduler::new(Box::new(output), &config);
    scheduler.resume()?;

    let frequency = 440.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let chunk_len = (config.sample_rate as f32 * CHUNK_SECS) as usize;

    for chunk in 0..CHUNKS {
        #[allow(clippy::cast_precision_loss)]
        let samples: Vec<f32> = (chunk * chunk_len..(chunk + 1) * chunk_len)
            .map(|i| {
                let t = i as f32 / config.sample_rate as f32;
                (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
            })
            .collect();
        let scheduled = scheduler.schedule(AudioBuffer::mono(config.sample_rate, samples)?)?;
        println!(
            "chunk {} at {:.3}s for {:.3}s",
            scheduled.handle, scheduled.start, scheduled.duration
        );
    }

    let wait = Duration::from_secs_f64(scheduler.cursor() + 1.0);
    let drained = tokio::time::timeout(wait, async {
        while let Some(handle) = ended_rx.recv().await {
            if scheduler.complete(handle) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    scheduler.close()?;

    println!("\n---");
    if drained {
        println!("Playback drained. If you heard the tone, your speakers are working!");
    } else {
        println!("Playback did not finish in time.");
    }
    println!("If you didn't hear anything, check:");
    println!("  1. Run: salin devices");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// List input and output devices
fn devices() -> anyhow::Result<()> {
    let list = list_devices()?;

    println!("Input devices:");
    for name in &list.inputs {
        let marker = if list.default_input.as_ref() == Some(name) { "*" } else { " " };
        println!("  {marker} {name}");
    }

    println!("Output devices:");
    for name in &list.outputs {
        let marker = if list.default_output.as_ref() == Some(name) { "*" } else { " " };
        println!("  {marker} {name}");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse() {
        assert_eq!(parse_command(" Start "), Some(SessionCommand::Start));
        assert_eq!(parse_command("standby"), Some(SessionCommand::ToggleStandby));
        assert_eq!(parse_command("q"), Some(SessionCommand::Quit));
        assert_eq!(parse_command("dance"), None);
    }

    #[test]
    fn rms_of_constant_signal() {
        assert!((calculate_rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert!(calculate_rms(&[]).abs() < f32::EPSILON);
    }
}
