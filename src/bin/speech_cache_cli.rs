//! speech-cache CLI: synthesize, preload and inspect the narration cache.
//!
//! Usage:
//!   speech-cache-cli speak <text> [options]     Print the audio location for a line
//!   speech-cache-cli preload <file> [options]   Warm the cache for a step file
//!   speech-cache-cli stats                      Show local cache statistics
//!   speech-cache-cli evict                      Evict entries older than the max age
//!   speech-cache-cli clear                      Remove every cached file

use anyhow::{bail, Context};
use speech_cache::cache::LocalAudioStore;
use speech_cache::tts::{AudioFormat, TtsModel, Voice};
use speech_cache::{
    FailurePolicy, NarrationStep, PreloadJob, SpeechCache, SpeechCacheBuilder, SpeechCacheConfig,
    VoiceOptions,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let rest = &args[2..];
    match args[1].as_str() {
        "speak" => cmd_speak(rest).await,
        "preload" => cmd_preload(rest).await,
        "stats" => cmd_stats(rest).await,
        "evict" => cmd_evict(rest).await,
        "clear" => cmd_clear(rest).await,
        "version" | "--version" | "-V" => {
            println!("speech-cache-cli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"speech-cache-cli: narration cache tool

USAGE:
    speech-cache-cli <COMMAND> [OPTIONS]

COMMANDS:
    speak <text>        Resolve audio for one line and print its location
    preload <file>      Resolve every step in a file (YAML list of {{id, text}}, or one line per step)
    stats               Show local cache statistics
    evict               Evict entries older than the configured max age
    clear               Remove all locally cached audio
    version             Show version information
    help                Show this help message

OPTIONS:
    --config <path>     YAML configuration file
    --dir <path>        Cache directory (overrides config)
    --voice <name>      alloy | echo | fable | onyx | nova | shimmer
    --model <name>      tts-1 | tts-1-hd
    --speed <value>     0.25 - 4.0
    --format <name>     mp3 | opus | aac | flac | wav | pcm
    --abort-on-error    Stop a preload at the first failed step

ENVIRONMENT:
    SPEECH_CACHE_DIR, SPEECH_CACHE_MAX_AGE_SECS, SPEECH_MIN_INTERVAL_MS,
    SPEECH_BASE_URL, SPEECH_TIMEOUT_SECS, SPEECH_REMOTE_URL, SPEECH_REMOTE_TOKEN,
    OPENAI_API_KEY      Provider key (after the OS keyring)
    RUST_LOG            Log filter (default: info)"#
    );
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

/// First argument that is neither a flag nor a flag value.
fn positional(args: &[String]) -> Option<&str> {
    let mut skip = false;
    for arg in args {
        if skip {
            skip = false;
            continue;
        }
        if arg == "--abort-on-error" {
            continue;
        }
        if arg.starts_with("--") {
            skip = true;
            continue;
        }
        return Some(arg);
    }
    None
}

async fn load_config(args: &[String]) -> anyhow::Result<SpeechCacheConfig> {
    let mut config = match flag(args, "--config") {
        Some(path) => SpeechCacheConfig::from_file(path)
            .await
            .with_context(|| format!("loading {path}"))?,
        None => SpeechCacheConfig::default(),
    };
    config.apply_env()?;
    if let Some(dir) = flag(args, "--dir") {
        config.cache_dir = PathBuf::from(dir);
    }
    Ok(config)
}

fn voice_options(args: &[String], base: &VoiceOptions) -> anyhow::Result<VoiceOptions> {
    let mut options = base.clone();
    if let Some(v) = flag(args, "--voice") {
        options = options.with_voice(Voice::parse(v));
    }
    if let Some(m) = flag(args, "--model") {
        options = options.with_model(TtsModel::parse(m));
    }
    if let Some(s) = flag(args, "--speed") {
        let speed: f32 = s.parse().with_context(|| format!("invalid --speed '{s}'"))?;
        options = options.with_speed(speed);
    }
    if let Some(f) = flag(args, "--format") {
        options = options.with_format(AudioFormat::parse(f));
    }
    Ok(options)
}

async fn open_service(config: SpeechCacheConfig) -> anyhow::Result<SpeechCache> {
    SpeechCacheBuilder::from_config(config)
        .build()
        .await
        .context("starting speech cache")
}

async fn cmd_speak(args: &[String]) -> anyhow::Result<()> {
    let Some(text) = positional(args) else {
        bail!("usage: speech-cache-cli speak <text> [options]");
    };
    let config = load_config(args).await?;
    let options = voice_options(args, &config.voice)?;
    let cache = open_service(config).await?;
    let location = cache.synthesize_and_get(text, &options).await?;
    println!("{location}");
    Ok(())
}

fn read_steps(path: &Path, content: &str) -> anyhow::Result<Vec<NarrationStep>> {
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        return serde_yaml::from_str(content).with_context(|| format!("parsing {}", path.display()));
    }
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .enumerate()
        .map(|(i, line)| NarrationStep::new(format!("step-{}", i + 1), line))
        .collect())
}

async fn cmd_preload(args: &[String]) -> anyhow::Result<()> {
    let Some(file) = positional(args) else {
        bail!("usage: speech-cache-cli preload <file> [options]");
    };
    let path = PathBuf::from(file);
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let steps = read_steps(&path, &content)?;

    let config = load_config(args).await?;
    let options = voice_options(args, &config.voice)?;
    let cache = open_service(config).await?;

    let mut job = PreloadJob::new(steps, options);
    if args.iter().any(|a| a == "--abort-on-error") {
        job = job.with_policy(FailurePolicy::Abort);
    }
    let handle = job.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling preload...");
            handle.cancel();
        }
    });

    let report = cache
        .preload(&job, |p| {
            eprintln!("[{:>3.0}%] {} ({}/{})", p.fraction * 100.0, p.step_id, p.completed, p.total);
        })
        .await?;

    for step in job.steps() {
        match report.location(&step.id) {
            Some(location) => println!("{}\t{}", step.id, location),
            None => println!("{}\t-", step.id),
        }
    }
    for failure in &report.failures {
        eprintln!("{} failed [{}]: {}", failure.step_id, failure.code.code(), failure.error);
    }
    println!("state: {:?}, progress: {:.0}%", report.state, report.progress * 100.0);
    if report.is_partial() {
        std::process::exit(2);
    }
    Ok(())
}

async fn cmd_stats(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args).await?;
    let store = LocalAudioStore::open(&config.cache_dir).await?;
    let stats = store.stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn cmd_evict(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args).await?;
    let store = LocalAudioStore::open(&config.cache_dir).await?;
    let removed = store.evict_older_than(config.max_age()).await?;
    println!("evicted {removed} entries older than {}s", config.max_age_secs);
    Ok(())
}

async fn cmd_clear(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args).await?;
    let store = LocalAudioStore::open(&config.cache_dir).await?;
    let removed = store.clear().await?;
    println!("removed {removed} entries from {}", config.cache_dir.display());
    Ok(())
}
