// demos/interview_console.rs
use cpal::{
    SampleFormat, SampleRate, StreamConfig, SupportedStreamConfig,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use realtime_interview::{
    CaptureInput, ControllerConfig, ControllerHandle, FrameCapture, InterviewBrief,
    PlaybackOutput, RealtimeClientBuilder, SAMPLE_RATE_HZ, SessionController, StreamPlayer,
    TurnMode,
};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";

fn find_supported_config<F, I>(
    mut configs: F,
    target_sample_rate: u32,
    target_channels: u16,
) -> Result<SupportedStreamConfig, anyhow::Error>
where
    F: FnMut() -> Result<I, cpal::SupportedStreamConfigsError>,
    I: Iterator<Item = cpal::SupportedStreamConfigRange>,
{
    let mut best: Option<SupportedStreamConfig> = None;
    let mut best_diff = u32::MAX;

    for range in configs()? {
        if range.channels() != target_channels || range.sample_format() != SampleFormat::I16 {
            continue;
        }
        let rate = target_sample_rate
            .clamp(range.min_sample_rate().0, range.max_sample_rate().0);
        let diff = rate.abs_diff(target_sample_rate);
        if best.is_none() || diff < best_diff {
            best_diff = diff;
            best = Some(range.with_sample_rate(SampleRate(rate)));
        }
        if diff == 0 {
            break;
        }
    }
    best.ok_or_else(|| {
        anyhow::anyhow!(
            "No i16 config for ~{}Hz {}ch",
            target_sample_rate,
            target_channels
        )
    })
}

fn setup_audio_input(input: CaptureInput) -> Result<cpal::Stream, anyhow::Error> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow::anyhow!("No input device"))?;
    info!("[AudioInput] Using input: {}", device.name()?);

    let supported = find_supported_config(|| device.supported_input_configs(), SAMPLE_RATE_HZ, 1)
        .or_else(|e| {
            warn!("No 24kHz mono input ({}). Trying 48kHz mono.", e);
            find_supported_config(|| device.supported_input_configs(), 48000, 1)
        })
        .or_else(|e| {
            warn!("No 48kHz mono input ({}). Trying 48kHz stereo.", e);
            find_supported_config(|| device.supported_input_configs(), 48000, 2)
        })?;

    let config: StreamConfig = supported.into();
    let rate = config.sample_rate.0;
    let channels = config.channels;
    info!("[AudioInput] CPAL selected input: {} Hz, {} ch", rate, channels);

    let reported = AtomicBool::new(false);
    let stream = device.build_input_stream(
        &config,
        move |data: &[i16], _: &cpal::InputCallbackInfo| {
            if let Err(e) = input.push_with_format(data, rate, channels) {
                if !reported.swap(true, Ordering::Relaxed) {
                    error!("[AudioInput] {}", e);
                }
            }
        },
        |err| error!("[AudioInput] CPAL Error: {}", err),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

fn setup_audio_output(output: PlaybackOutput) -> Result<cpal::Stream, anyhow::Error> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("No output device"))?;
    info!("[AudioOutput] Using output: {}", device.name()?);

    let supported = find_supported_config(|| device.supported_output_configs(), SAMPLE_RATE_HZ, 1)
        .or_else(|e| {
            warn!("No 24kHz mono output ({}). Trying 24kHz stereo.", e);
            find_supported_config(|| device.supported_output_configs(), SAMPLE_RATE_HZ, 2)
        })?;

    let config: StreamConfig = supported.into();
    let channels = config.channels;
    if config.sample_rate.0 != SAMPLE_RATE_HZ {
        warn!(
            "[AudioOutput] Device runs at {} Hz; agent audio will play at the wrong speed.",
            config.sample_rate.0
        );
    }
    info!(
        "[AudioOutput] CPAL selected output: {} Hz, {} ch",
        config.sample_rate.0, channels
    );

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
            output.fill_interleaved(data, channels);
        },
        |err| error!("[AudioOutput] CPAL Error: {}", err),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

fn load_config() -> Result<ControllerConfig, anyhow::Error> {
    match env::var("INTERVIEW_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            let config: ControllerConfig = serde_json::from_str(&raw)?;
            info!("Loaded controller config from {}", path);
            Ok(config)
        }
        Err(_) => Ok(ControllerConfig::default()),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  r            start talking (manual mode)");
    println!("  s            stop talking and request a response");
    println!("  m            toggle manual / server VAD turn-taking");
    println!("  e <text>     replace the editor contents");
    println!("  f            ask for feedback on the editor contents");
    println!("  d <item_id>  delete a conversation item");
    println!("  items | log | mem | status");
    println!("  q            disconnect and quit");
}

async fn operator(handle: ControllerHandle) -> Result<(), anyhow::Error> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_help();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let result = match command {
            "r" => handle.start_recording().await,
            "s" => handle.stop_recording().await,
            "m" => {
                let session = handle.session().await?;
                let next = match session.turn_mode {
                    TurnMode::Manual => TurnMode::ServerVad,
                    TurnMode::ServerVad => TurnMode::Manual,
                };
                println!("Turn mode: {:?}", next);
                handle.set_turn_mode(next).await
            }
            "e" => handle.set_editor_text(rest).await,
            "f" => handle.request_feedback().await,
            "d" => handle.delete_item(rest).await,
            "items" => {
                for item in handle.items().await? {
                    let text = if item.transcript.is_empty() {
                        &item.text
                    } else {
                        &item.transcript
                    };
                    let audio = match &item.asset {
                        Some(asset) => format!(" [{:.1}s audio]", asset.duration.as_secs_f32()),
                        None => String::new(),
                    };
                    println!(
                        "{} {:?} {:?} {:?}: {}{}",
                        item.id, item.kind, item.role, item.status, text, audio
                    );
                }
                Ok(())
            }
            "log" => {
                for entry in handle.event_log().await? {
                    println!(
                        "{} {:?} {} x{}",
                        entry.timestamp.format("%H:%M:%S%.3f"),
                        entry.source,
                        entry.type_name,
                        entry.repeat_count
                    );
                }
                Ok(())
            }
            "mem" => {
                for (key, value) in handle.memory().await? {
                    println!("{} = {}", key, value);
                }
                Ok(())
            }
            "status" => {
                let session = handle.session().await?;
                let turn = handle.turn_state().await?;
                println!("{:?} since {:?}, {:?}", session.status, session.start_time, turn);
                Ok(())
            }
            "q" => {
                handle.disconnect().await?;
                break;
            }
            "" => Ok(()),
            _ => {
                print_help();
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("Command '{}' failed: {}", command, e);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    dotenv::dotenv().ok();
    let api_key = env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
    let model = env::var("OPENAI_REALTIME_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
    let config = load_config()?;

    let mut builder = RealtimeClientBuilder::new(api_key, model).voice("alloy");
    if let Ok(url) = env::var("OPENAI_REALTIME_URL") {
        builder = builder.url(url);
    }
    let client = builder.build()?;

    let (capture, capture_input) = FrameCapture::new(config.frame_size);
    let (player, playback_output) = StreamPlayer::new();
    let _input_stream = setup_audio_input(capture_input)?;
    let _output_stream = setup_audio_output(playback_output)?;

    let mut controller = SessionController::new(client, capture, player, config).await?;
    let brief = InterviewBrief {
        role: env::var("INTERVIEW_ROLE").unwrap_or_default(),
        company: env::var("INTERVIEW_COMPANY").unwrap_or_default(),
        custom_prompt: env::var("INTERVIEW_PROMPT").unwrap_or_default(),
    };
    controller.connect(&brief).await?;
    info!("Connected in {:?} mode.", controller.turn_mode());

    let operator_task = tokio::spawn(operator(controller.handle()));

    tokio::select! {
        result = controller.run() => {
            if let Err(e) = result {
                error!("Dispatch loop failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, disconnecting.");
            controller.disconnect().await;
        }
    }
    operator_task.abort();

    info!(
        "Session over: {} items, {} log entries.",
        controller.items().len(),
        controller.event_log().len()
    );
    Ok(())
}
