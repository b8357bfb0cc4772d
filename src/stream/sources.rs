//! Built-in source table.

use std::time::Duration;

use crate::request::{Episode, ExtractionTarget, MediaType};
use crate::stream::source::{InteractionStep, NavigationPolicy, NavigationWait, SourceDescriptor};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(10);

/// vidsrc only requests its stream after the play button inside the player
/// iframe is pressed.
const VIDSRC_PLAY: &[InteractionStep] = &[InteractionStep::ClickInFrame {
    frame: "iframe",
    element: "#pl_but",
}];

/// The five sources queried for every request, in merge order.
#[must_use]
pub fn builtin_sources() -> Vec<SourceDescriptor> {
    vec![
        SourceDescriptor {
            name: "wooflix",
            build_url: wooflix_url,
            // never reaches network idle
            navigation: NavigationPolicy {
                wait: NavigationWait::DomContentLoaded,
                timeout: Some(NAVIGATION_TIMEOUT),
            },
            interaction: &[],
            capture_timeout: None,
            decoy_domain: None,
        },
        SourceDescriptor {
            name: "vilora",
            build_url: vilora_url,
            navigation: idle_with_ceiling(),
            interaction: &[],
            capture_timeout: None,
            decoy_domain: None,
        },
        SourceDescriptor {
            name: "vidsrc",
            build_url: vidsrc_url,
            navigation: idle_with_ceiling(),
            interaction: VIDSRC_PLAY,
            capture_timeout: None,
            decoy_domain: None,
        },
        SourceDescriptor {
            name: "vidjoy",
            build_url: vidjoy_url,
            navigation: idle_with_ceiling(),
            interaction: &[],
            capture_timeout: None,
            decoy_domain: Some("vidjoy"),
        },
        SourceDescriptor {
            name: "vidify",
            build_url: vidify_url,
            // slow to answer but reliable
            navigation: NavigationPolicy {
                wait: NavigationWait::Load,
                timeout: None,
            },
            interaction: &[],
            capture_timeout: None,
            decoy_domain: None,
        },
    ]
}

fn idle_with_ceiling() -> NavigationPolicy {
    NavigationPolicy {
        wait: NavigationWait::NetworkAlmostIdle,
        timeout: Some(NAVIGATION_TIMEOUT),
    }
}

/// `Some(episode)` only for series targets.
fn series_episode(target: &ExtractionTarget) -> Option<Episode> {
    match target.media_type {
        MediaType::Movie => None,
        MediaType::Series => target.episode,
    }
}

fn wooflix_url(target: &ExtractionTarget) -> String {
    let id = target.id;
    match series_episode(target) {
        None => format!("https://wooflixtv.co/watch/movie/{id}"),
        Some(Episode { season, episode }) => {
            format!("https://wooflixtv.co/watch/tv/{id}?season={season}&episode={episode}")
        }
    }
}

fn vilora_url(target: &ExtractionTarget) -> String {
    path_style("https://veloratv.ru/watch", target)
}

fn vidsrc_url(target: &ExtractionTarget) -> String {
    path_style("https://vidsrc.xyz/embed", target)
}

fn vidjoy_url(target: &ExtractionTarget) -> String {
    path_style("https://vidjoy.pro/embed", target)
}

fn vidify_url(target: &ExtractionTarget) -> String {
    path_style("https://vidify.top/embed", target)
}

/// `<base>/movie/<id>` or `<base>/tv/<id>/<season>/<episode>`.
fn path_style(base: &str, target: &ExtractionTarget) -> String {
    let id = target.id;
    match series_episode(target) {
        None => format!("{base}/movie/{id}"),
        Some(Episode { season, episode }) => format!("{base}/tv/{id}/{season}/{episode}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ResolvedId;
    use crate::stream::source::SourceRegistry;

    fn movie(id: u64) -> ExtractionTarget {
        ExtractionTarget {
            media_type: MediaType::Movie,
            id: ResolvedId(id),
            episode: None,
        }
    }

    fn series(id: u64, season: u32, episode: u32) -> ExtractionTarget {
        ExtractionTarget {
            media_type: MediaType::Series,
            id: ResolvedId(id),
            episode: Some(Episode { season, episode }),
        }
    }

    #[test]
    fn registry_order() {
        let registry = SourceRegistry::builtin();
        let names: Vec<_> = registry.iter().map(|s| s.name).collect();
        assert_eq!(names, ["wooflix", "vilora", "vidsrc", "vidjoy", "vidify"]);
    }

    #[test]
    fn movie_urls() {
        let registry = SourceRegistry::builtin();
        let target = movie(278);
        let urls: Vec<_> = registry.iter().map(|s| s.url_for(&target)).collect();
        assert_eq!(
            urls,
            [
                "https://wooflixtv.co/watch/movie/278",
                "https://veloratv.ru/watch/movie/278",
                "https://vidsrc.xyz/embed/movie/278",
                "https://vidjoy.pro/embed/movie/278",
                "https://vidify.top/embed/movie/278",
            ]
        );
    }

    #[test]
    fn series_urls() {
        let registry = SourceRegistry::builtin();
        let target = series(1396, 2, 5);
        assert_eq!(
            registry.get("wooflix").unwrap().url_for(&target),
            "https://wooflixtv.co/watch/tv/1396?season=2&episode=5"
        );
        assert_eq!(
            registry.get("vidsrc").unwrap().url_for(&target),
            "https://vidsrc.xyz/embed/tv/1396/2/5"
        );
        assert_eq!(
            registry.get("vidify").unwrap().url_for(&target),
            "https://vidify.top/embed/tv/1396/2/5"
        );
    }

    #[test]
    fn url_builders_are_pure() {
        let registry = SourceRegistry::builtin();
        for target in [movie(278), series(1396, 1, 1)] {
            for source in registry.iter() {
                assert_eq!(source.url_for(&target), source.url_for(&target));
            }
        }
    }

    #[test]
    fn quirks() {
        let registry = SourceRegistry::builtin();

        let wooflix = registry.get("wooflix").unwrap();
        assert_eq!(wooflix.navigation.wait, NavigationWait::DomContentLoaded);

        let vidify = registry.get("vidify").unwrap();
        assert_eq!(vidify.navigation.timeout, None);

        let vidsrc = registry.get("vidsrc").unwrap();
        assert_eq!(vidsrc.interaction, VIDSRC_PLAY);
        assert_eq!(vidsrc.navigation.timeout, Some(NAVIGATION_TIMEOUT));

        let vidjoy = registry.get("vidjoy").unwrap();
        assert_eq!(vidjoy.decoy_domain, Some("vidjoy"));
    }
}
