use std::path::Path;

use anyhow::{bail, Result};

use bytewatch::{Config, RequestClassifier, SourceRegistry};

pub fn cmd_classify(config: Option<&Path>, url: &str, source: &str) -> Result<()> {
    let config = Config::load(config)?;
    let registry = SourceRegistry::builtin();
    let Some(source) = registry.get(source) else {
        let names: Vec<_> = registry.iter().map(|s| s.name).collect();
        bail!("Unknown source: {source} (known: {})", names.join(", "));
    };

    let classifier = RequestClassifier::new(&registry)
        .with_blocked(config.classifier.extra_blocked.iter().cloned());
    let verdict = classifier.classify(url, source.name);

    println!("{}", format!("{verdict:?}").to_lowercase());
    if classifier.is_decoy(url, source.name) {
        println!("(decoy for {})", source.name);
    }
    Ok(())
}
