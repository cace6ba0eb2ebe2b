//! Example: resolve a track through a local Playdar daemon
//!
//! Run with: cargo run -p pmoplaydar --example resolve_track -- "Artist" "Album" "Track"

use pmoconfig::Config;
use pmoplaydar::{Listener, PlaydarClient, PlaydarConfigExt};
use std::env;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_config("")?;

    // RUST_LOG wins over the configured level
    let level = config.get_log_min_level()?.to_lowercase();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    let mut args = env::args().skip(1);
    let artist = args.next().unwrap_or_else(|| "Miles Davis".to_string());
    let album = args.next().unwrap_or_else(|| "Kind of Blue".to_string());
    let track = args.next().unwrap_or_else(|| "So What".to_string());

    let transport = Arc::new(config.http_transport()?);
    let client = PlaydarClient::builder()
        .settings(config.resolver_settings()?)
        .transport(transport.clone())
        .listener(Listener::resolve_idle(|| println!("Nothing left to resolve")))
        .build()?;

    let stat = client.stat().await?;
    println!(
        "Playdar {} ({})",
        stat.version,
        if stat.authenticated { "authorised" } else { "not authorised" }
    );

    println!("Resolving {} - {} - {}...\n", artist, album, track);
    let qid = client.resolve(artist, album, track, None, None)?;
    let mut updates = client.results_channel(qid)?;

    while let Some(update) = updates.recv().await {
        let response = &update.response;
        println!(
            "{} result(s), solved: {}, final: {}",
            response.results.len(),
            response.solved,
            update.final_answer
        );
        if !update.final_answer {
            continue;
        }

        for result in &response.results {
            println!(
                "  {} - {} ({}) score {:.2}",
                result.artist.as_deref().unwrap_or("?"),
                result.track.as_deref().unwrap_or("?"),
                result.source.as_deref().unwrap_or("unknown source"),
                result.score.unwrap_or(0.0)
            );
            if let Some(sid) = &result.sid {
                println!("    {}", transport.stream_url(sid)?);
            }
        }
        break;
    }

    client.shutdown()?;
    Ok(())
}
