use std::path::Path;
use std::time::Instant;

use anyhow::Result;

use bytewatch::{Config, StreamEntry};

pub async fn cmd_streams(
    config: Option<&Path>,
    media_type: &str,
    id: &str,
    json: bool,
) -> Result<()> {
    let config = Config::load(config)?;
    let service = bytewatch::build_service(&config)?;

    let start = Instant::now();
    let streams = service.handle(media_type, id).await;
    let elapsed = start.elapsed();

    if json {
        println!("{}", serde_json::to_string_pretty(&streams)?);
        return Ok(());
    }

    print_streams(&streams);
    eprintln!("\n⏱️  {:.1}s", elapsed.as_secs_f64());
    Ok(())
}

fn print_streams(streams: &[StreamEntry]) {
    let Some(first) = streams.first() else {
        println!("No streams found");
        return;
    };

    println!("🎬 {}", first.description);
    for stream in streams {
        println!("   {:<14} {}", stream.name, stream.url);
    }
}
