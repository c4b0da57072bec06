use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use dattivox_voice::session::{Envelope, SessionEvent};
use dattivox_voice::voice::{pcm, AudioFrame, CapturePipeline};
use dattivox_voice::{
    Config, ControllerHandle, CpalMicrophone, CpalSpeaker, EventBus, Microphone, Notice,
    PlaybackEngine, SessionController, SessionStats, VoiceSession, WsDialer,
};

/// Dattivox - Talk to a voice assistant over a streaming connection
#[derive(Parser)]
#[command(name = "dattivox", version, about)]
struct Cli {
    /// Voice service endpoint (ws:// or wss://)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Conversation language tag (e.g., "en", "it", "pt-BR")
    #[arg(short, long)]
    language: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive voice conversation (default)
    Talk,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Record the encoded frames to a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output through the playback queue
    TestSpeaker,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,dattivox_voice=info,dattivox=info",
        1 => "info,dattivox_voice=debug,dattivox=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config =
        Config::load()?.with_overrides(cli.endpoint.as_deref(), cli.language.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Talk) {
        Command::Talk => talk(config).await,
        Command::TestMic { duration, output } => test_mic(&config, duration, output).await,
        Command::TestSpeaker => test_speaker(&config).await,
    }
}

/// Interactive conversation driven by stdin commands
#[allow(clippy::future_not_send)]
async fn talk(config: Config) -> anyhow::Result<()> {
    let bus = EventBus::new();
    let speaker = CpalSpeaker::open(config.audio.sample_rate, bus.detached_sink())?;
    let mic = CpalMicrophone::new(config.audio.sample_rate);

    tracing::info!(
        endpoint = %config.connection_url(),
        language = %config.session.language,
        "starting dattivox"
    );

    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel::<Notice>();
    let session = VoiceSession::new(config, mic, speaker, WsDialer, bus).with_notices(notice_tx);
    let (controller, handle) = SessionController::new(session);

    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            if notice.is_error() {
                eprintln!("! {notice}");
            } else {
                println!("* {notice}");
            }
        }
    });

    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            ctrl_c.shutdown();
        }
    });

    // Blocking reads would hold up runtime shutdown, so stdin gets its own thread
    let input = handle.clone();
    std::thread::spawn(move || read_commands(&input));

    println!("Commands: start [lang] | stop | quit");
    handle.start(None);

    let stats = controller.run().await;
    print_summary(&stats);

    Ok(())
}

fn read_commands(handle: &ControllerHandle) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let mut words = line.split_whitespace();

        let delivered = match (words.next(), words.next()) {
            (Some("start"), language) => handle.start(language.map(ToString::to_string)),
            (Some("stop"), _) => handle.stop(),
            (Some("quit" | "exit"), _) => {
                handle.shutdown();
                return;
            }
            (None, _) => true,
            (Some(other), _) => {
                eprintln!("unknown command: {other}");
                true
            }
        };

        if !delivered {
            return;
        }
    }

    handle.shutdown();
}

fn print_summary(stats: &SessionStats) {
    println!("\n---");
    println!(
        "Frames: {} captured, {} sent, {} dropped ({} bytes out)",
        stats.frames_captured, stats.frames_sent, stats.frames_dropped, stats.bytes_sent
    );
    println!(
        "Playback: {} buffers ({} bytes in), {} interruptions",
        stats.buffers_enqueued, stats.bytes_received, stats.interruptions
    );
    if stats.malformed_payloads > 0 {
        println!("Discarded {} malformed payloads", stats.malformed_payloads);
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64, output: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut bus = EventBus::new();
    let mut mic = CpalMicrophone::new(config.audio.sample_rate);
    let device_rate = mic.acquire(bus.sink(1)).await?;
    let mut pipeline = CapturePipeline::new(
        device_rate,
        config.audio.sample_rate,
        config.audio.frame_samples,
    )?;

    println!(
        "Device rate: {device_rate} Hz, wire rate: {} Hz",
        config.audio.sample_rate
    );
    println!("---");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    let mut recorded: Vec<i16> = Vec::new();
    let mut frames = 0usize;

    loop {
        let envelope = tokio::select! {
            () = tokio::time::sleep_until(deadline) => break,
            envelope = bus.next() => envelope,
        };
        let Some(Envelope {
            event: SessionEvent::Captured(raw),
            ..
        }) = envelope
        else {
            continue;
        };

        for block in pipeline.push(&raw)? {
            frames += 1;
            let energy = pcm::rms(&block);
            let peak = block.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

            // Visual meter
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meter_len = (energy * 100.0).min(50.0) as usize;
            let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

            println!("[{frames:3}] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");

            if output.is_some() {
                recorded.extend(AudioFrame::from_floats(&block).samples);
            }
        }
    }

    mic.release();

    if let Some(path) = output {
        write_wav(&path, &recorded, config.audio.sample_rate)?;
        println!("\nWrote {} samples to {}", recorded.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Test speaker output with a sine wave split into wire-sized frames
#[allow(clippy::future_not_send)]
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for about 2 seconds\n");

    let sample_rate = config.audio.sample_rate;
    let mut bus = EventBus::new();
    let speaker = CpalSpeaker::open(sample_rate, bus.detached_sink())?;
    let mut playback = PlaybackEngine::new(speaker, sample_rate);

    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    let chunks = samples.chunks(config.audio.frame_samples);
    println!("Queueing {} frames at {sample_rate} Hz...", chunks.len());
    for chunk in chunks {
        playback.enqueue(&pcm::encode_le(&pcm::floats_to_pcm16(chunk)))?;
    }

    // Pump completions until the queue runs dry
    let limit = Duration::from_secs(10);
    let finished = tokio::time::timeout(limit, async {
        while playback.is_playing() {
            match bus.next().await {
                Some(Envelope {
                    event: SessionEvent::PlaybackFinished(id),
                    ..
                }) => playback.on_finished(id),
                Some(_) => {}
                None => break,
            }
        }
    })
    .await;

    if finished.is_err() {
        anyhow::bail!("playback did not finish within {limit:?}");
    }

    println!("\n---");
    println!("If you heard the tone in order with no repeats, playback scheduling is working.");
    println!("Short ticks between frames are expected: completions arrive once per output block.");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
