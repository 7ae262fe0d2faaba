mod cli;

use streamhold::{
    config,
    hls::HlsStream,
    is_playlist_url,
    recording::{self, RecordingInfo},
    timeshift::TimeshiftBuffer,
    transport::HttpTransport,
};
use streamhold_cache::{ByteStream, FileCacheBuffer, Playlist, Transport};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use cli::{Cli, Commands};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often the record and timeshift loops check for the deadline and source end.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

async fn show_playlist(url: &str, config: &config::Config) -> Result<()> {
    let transport = HttpTransport::new(&config.transport);
    let playlist = Playlist::load(&transport, url)
        .await
        .with_context(|| format!("Failed to load playlist {}", url))?;

    println!("Playlist: {}", playlist.url());
    println!("  Type: {}", if playlist.is_vod() { "VOD" } else { "live" });
    println!("  Segments: {}", playlist.len());
    let mut total = 0.0;
    for segment in playlist.segments() {
        println!("  #{:<6} {:>7.3}s  {}", segment.index, segment.duration, segment.url);
        total += segment.duration;
    }
    println!("  Duration: {:.3}s", total);
    Ok(())
}

/// Raw byte stream for `url`; playlists are read through an [`HlsStream`].
async fn open_source(url: &str, config: &config::Config) -> Result<Box<dyn ByteStream>> {
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.transport));
    if is_playlist_url(url) {
        let stream = HlsStream::open(url, None, Arc::clone(&transport), &config.hls)
            .await
            .with_context(|| format!("Failed to open playlist {}", url))?;
        return Ok(Box::new(stream.into_byte_stream(config.hls.reload_interval())));
    }
    transport
        .open_stream(url)
        .await
        .with_context(|| format!("Failed to open stream {}", url))
}

/// Wait until `deadline`, Ctrl-C or the end of the buffer's source.
async fn run_until(
    deadline: Instant,
    buffer: &TimeshiftBuffer,
    mut on_tick: impl FnMut() -> Result<()>,
) -> Result<()> {
    while Instant::now() < deadline && !buffer.is_finished() {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
        on_tick()?;
    }
    Ok(())
}

async fn timeshift(url: &str, output: &Path, seconds: u64, config: &config::Config) -> Result<()> {
    let dir = config.timeshift.resolved_dir();
    let cache = FileCacheBuffer::new(&dir, config.timeshift.file_cache_config())
        .with_context(|| format!("Failed to create timeshift directory {:?}", dir))?;
    let source = open_source(url, config).await?;
    let buffer = TimeshiftBuffer::start(source, cache);

    let mut file = std::fs::File::create(output)
        .with_context(|| format!("Failed to create output file {:?}", output))?;
    let mut buf = vec![0u8; config.timeshift.unit_size_kb * 1024];
    let mut copied = 0u64;
    let mut drain = |buffer: &TimeshiftBuffer| -> Result<()> {
        loop {
            let n = buffer.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            file.write_all(&buf[..n])?;
            copied += n as u64;
        }
    };

    let deadline = Instant::now() + Duration::from_secs(seconds);
    run_until(deadline, &buffer, || drain(&buffer)).await?;
    drain(&buffer)?;

    println!(
        "Copied {} bytes; window {}..{} bytes",
        copied,
        buffer.begin(),
        buffer.length()
    );
    buffer.stop().await.context("Timeshift stream failed")?;
    Ok(())
}

async fn record(
    url: &str,
    base_dir: PathBuf,
    seconds: u64,
    title: &str,
    id: Option<u32>,
    channel: u32,
    config: &config::Config,
) -> Result<()> {
    let start = Utc::now();
    let id = id.unwrap_or_else(|| start.timestamp() as u32);
    let dir = recording::directory_for_recording(&base_dir, id);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create recording directory {:?}", dir))?;
    recording::write_info(&dir, &RecordingInfo::new(channel, title, "", start))?;

    let source = open_source(url, config).await?;
    let cache = FileCacheBuffer::new(
        &dir,
        recording::recording_cache_config(&config.timeshift.file_cache_config()),
    )?;
    let buffer = TimeshiftBuffer::start(source, cache);
    tracing::info!("Recording {} into {:?} for {}s", url, dir, seconds);

    let deadline = Instant::now() + Duration::from_secs(seconds);
    run_until(deadline, &buffer, || Ok(())).await?;

    let stored = buffer.stop().await;
    let info = recording::update_duration(&dir, Utc::now())?;
    let stored = stored.context("Recording stream failed")?;
    println!(
        "Recorded {} bytes ({}s) to {}",
        stored,
        info.duration_secs,
        dir.display()
    );
    Ok(())
}

fn list_recordings(base_dir: &Path) -> Result<()> {
    let recordings = recording::list_recordings(base_dir)?;
    if recordings.is_empty() {
        println!("No recordings in {}", base_dir.display());
        return Ok(());
    }
    for (dir, info) in recordings {
        println!(
            "{}  {}  channel {}  {}s  {}",
            dir.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
            info.start_time.format("%Y-%m-%d %H:%M"),
            info.channel_id,
            info.duration_secs,
            info.title
        );
    }
    Ok(())
}

fn dump_recording(dir: &Path, output: &Path, config: &config::Config) -> Result<()> {
    let buffer = FileCacheBuffer::open(dir, config.timeshift.file_cache_config())
        .with_context(|| format!("Failed to open recording {:?}", dir))?;
    if let Ok(info) = recording::read_info(dir) {
        println!("Recording: {} ({}s)", info.title, info.duration_secs);
    }

    let mut file = std::fs::File::create(output)
        .with_context(|| format!("Failed to create output file {:?}", output))?;
    let mut buf = vec![0u8; buffer.unit_size()];
    let mut total = 0u64;
    loop {
        let n = buffer.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        total += n as u64;
    }

    if total != buffer.length() {
        anyhow::bail!(
            "Recording ended early: read {} of {} bytes",
            total,
            buffer.length()
        );
    }
    println!("Wrote {} bytes to {}", total, output.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "streamhold=trace,streamhold_cache=trace".to_string()
        } else {
            "streamhold=info,streamhold_cache=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Playlist { url } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(show_playlist(&url, &config))
        }
        Commands::Record {
            url,
            dir,
            seconds,
            title,
            id,
            channel,
        } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let base_dir = dir.unwrap_or_else(|| config.recordings.resolved_dir());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(record(
                &url, base_dir, seconds, &title, id, channel, &config,
            ))
        }
        Commands::Timeshift {
            url,
            output,
            seconds,
        } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(timeshift(&url, &output, seconds, &config))
        }
        Commands::Recordings { dir } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let base_dir = dir.unwrap_or_else(|| config.recordings.resolved_dir());
            list_recordings(&base_dir)
        }
        Commands::Delete { dir } => {
            recording::delete_recording(&dir)?;
            println!("Deleted {}", dir.display());
            Ok(())
        }
        Commands::Dump { dir, output } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            dump_recording(&dir, &output, &config)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("streamhold {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!(
        "  HLS: {} segments x {} MiB",
        config.hls.segments_to_cache, config.hls.segment_size_mb
    );
    println!(
        "  Timeshift: {:?}, {} MiB chunks, {} KiB units, factor {}",
        config.timeshift.dir,
        config.timeshift.chunk_size_mb,
        config.timeshift.unit_size_kb,
        config.timeshift.size_factor
    );
    println!("  Recordings: {:?}", config.recordings.dir);
    println!("  Transport timeout: {}s", config.transport.timeout_secs);
    Ok(())
}
