use anyhow::Result;

use bytewatch::request::{Episode, ExtractionTarget};
use bytewatch::stream::source::InteractionStep;
use bytewatch::{MediaType, ResolvedId, SourceRegistry};

pub fn cmd_sources(media_type: &str, id: Option<u64>, season: u32, episode: u32) -> Result<()> {
    let media_type: MediaType = media_type.parse()?;
    let registry = SourceRegistry::builtin();

    let target = id.map(|id| ExtractionTarget {
        media_type,
        id: ResolvedId(id),
        episode: (media_type == MediaType::Series).then_some(Episode { season, episode }),
    });

    println!("📺 {} sources:\n", registry.len());
    for source in registry.iter() {
        let ceiling = source
            .navigation
            .timeout
            .map_or_else(|| "no limit".to_string(), |t| format!("{}s", t.as_secs()));
        println!(
            "{:<8} wait: {} ({ceiling})",
            source.name,
            source.navigation.wait.lifecycle_event()
        );
        for step in source.interaction {
            match step {
                InteractionStep::ClickInFrame { frame, element } => {
                    println!("         click: {element} in {frame}");
                }
            }
        }
        if let Some(domain) = source.decoy_domain {
            println!("         decoy: {domain}");
        }
        if let Some(target) = &target {
            println!("         url:   {}", source.url_for(target));
        }
    }
    Ok(())
}
