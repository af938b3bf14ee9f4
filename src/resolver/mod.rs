//! SourcePage resolver
//!
//! Turns one listing URL into a lazy stream of episode descriptors. A season
//! index is paginated through its "older entries" links and every episode
//! page found on it is resolved and sent downstream as soon as it is parsed,
//! so the coordinator can start downloading before the index is exhausted.
//!
//! Resolution of a single episode page:
//!
//! 1. GET the page with the configured headers
//! 2. Take the title from the entry heading and split it into show, season
//!    label and episode label ([`title::parse_title`])
//! 3. POST every `data-apireq` payload to the player API and collect the
//!    returned sources together with the cookies the API sets

pub mod page;
pub mod title;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::types::{EpisodeDescriptor, ListingKind, ListingUrl, RawSource};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

pub use title::{ParsedTitle, parse_title};

/// Descriptors buffered ahead of the consumer
const RESOLVE_BUFFER: usize = 8;

/// A resolved episode plus the network retries its resolution took
#[derive(Debug, Clone)]
pub struct ResolvedEpisode {
    /// The episode
    pub descriptor: EpisodeDescriptor,
    /// Retries spent fetching the page and calling the player API
    pub retries: u32,
}

/// A listing or episode page that could not be resolved
#[derive(Debug)]
pub struct ResolveFailure {
    /// The page (or listing input) that failed
    pub url: String,
    /// Why it failed
    pub error: Error,
    /// Retries spent before giving up
    pub retries: u32,
}

/// One item of a resolution stream
pub type ResolveItem = std::result::Result<ResolvedEpisode, ResolveFailure>;

#[derive(Debug, Deserialize)]
struct PlayerResponse {
    #[serde(default)]
    s: Vec<PlayerSource>,
}

#[derive(Debug, Deserialize)]
struct PlayerSource {
    src: Option<String>,
    #[serde(rename = "type")]
    mime: Option<String>,
}

/// Resolves listing URLs into episode descriptors (cheap to clone)
#[derive(Clone)]
pub struct Resolver {
    http: HttpClient,
    config: Arc<Config>,
    api_endpoint: Url,
}

impl Resolver {
    /// Create a resolver sharing the run's HTTP client and configuration
    pub fn new(http: HttpClient, config: Arc<Config>) -> Result<Self> {
        let api_endpoint = Url::parse(&config.http.api_endpoint).map_err(|e| {
            Error::config(
                format!("'{}' is not a valid URL: {}", config.http.api_endpoint, e),
                "api_endpoint",
            )
        })?;
        Ok(Self {
            http,
            config,
            api_endpoint,
        })
    }

    /// Resolve one listing URL into a finite stream of episodes
    ///
    /// Never yields an empty success: a listing that produces no episodes
    /// yields exactly one [`ResolveFailure`]. Must be called inside a tokio
    /// runtime.
    pub fn resolve(&self, input: &str) -> ReceiverStream<ResolveItem> {
        let (tx, rx) = mpsc::channel(RESOLVE_BUFFER);
        let resolver = self.clone();
        let input = input.to_string();
        tokio::spawn(async move {
            resolver.produce(&input, &tx).await;
        });
        ReceiverStream::new(rx)
    }

    async fn produce(&self, input: &str, tx: &mpsc::Sender<ResolveItem>) {
        let listing = match ListingUrl::parse(input) {
            Ok(listing) => listing,
            Err(error) => {
                tracing::warn!(url = %input, error = %error, "Rejected listing URL");
                let _ = tx
                    .send(Err(ResolveFailure {
                        url: input.to_string(),
                        error,
                        retries: 0,
                    }))
                    .await;
                return;
            }
        };

        match listing.kind() {
            ListingKind::Episode => {
                let item = self.resolve_page(listing.url()).await;
                let _ = tx.send(item).await;
            }
            ListingKind::SeasonIndex => self.enumerate_index(listing.url(), tx).await,
        }
    }

    /// Walk a season index page by page, resolving each episode as it is found
    async fn enumerate_index(&self, index: &Url, tx: &mpsc::Sender<ResolveItem>) {
        let mut next = Some(index.clone());
        let mut visited: HashSet<Url> = HashSet::new();
        let mut seen_episodes: HashSet<Url> = HashSet::new();
        let mut yielded = 0usize;

        while let Some(page_url) = next.take() {
            if !visited.insert(page_url.clone()) {
                tracing::debug!(url = %page_url, "Pagination loops back, stopping");
                break;
            }

            let retries = AtomicU32::new(0);
            let html = match self.http.get_text(&page_url, &retries).await {
                Ok(html) => html,
                Err(error) => {
                    tracing::warn!(url = %page_url, error = %error, "Failed to fetch index page");
                    let _ = tx
                        .send(Err(ResolveFailure {
                            url: page_url.to_string(),
                            error,
                            retries: retries.load(Ordering::Relaxed),
                        }))
                        .await;
                    return;
                }
            };

            let links = page::entry_links(&html, &page_url);
            tracing::debug!(url = %page_url, episodes = links.len(), "Parsed index page");

            for link in links {
                if !seen_episodes.insert(link.clone()) {
                    continue;
                }
                let item = self.resolve_page(&link).await;
                yielded += 1;
                if tx.send(item).await.is_err() {
                    // consumer went away
                    return;
                }
            }

            next = page::next_page(&html, &page_url);
        }

        if yielded == 0 {
            let _ = tx
                .send(Err(ResolveFailure {
                    url: index.to_string(),
                    error: Error::Parse(format!("no episodes found on {}", index)),
                    retries: 0,
                }))
                .await;
        }
    }

    async fn resolve_page(&self, page_url: &Url) -> ResolveItem {
        let retries = AtomicU32::new(0);
        match self.resolve_episode(page_url, &retries).await {
            Ok(descriptor) => {
                tracing::info!(
                    url = %page_url,
                    show = %descriptor.show_title,
                    episode = %descriptor.episode_label,
                    sources = descriptor.sources.len(),
                    "Resolved episode"
                );
                Ok(ResolvedEpisode {
                    descriptor,
                    retries: retries.load(Ordering::Relaxed),
                })
            }
            Err(error) => {
                tracing::warn!(url = %page_url, error = %error, "Failed to resolve episode");
                Err(ResolveFailure {
                    url: page_url.to_string(),
                    error,
                    retries: retries.load(Ordering::Relaxed),
                })
            }
        }
    }

    /// Resolve a single episode page into its descriptor
    pub async fn resolve_episode(
        &self,
        page_url: &Url,
        retries: &AtomicU32,
    ) -> Result<EpisodeDescriptor> {
        let html = self.http.get_text(page_url, retries).await?;

        let raw_title = page::page_title(&html)
            .ok_or_else(|| Error::Parse(format!("no episode title on {}", page_url)))?;
        let parsed = parse_title(&raw_title, &self.config.seasons)?;

        let requests = page::player_requests(&html);
        if requests.is_empty() {
            return Err(Error::Parse(format!("no video player on {}", page_url)));
        }

        let mut sources = Vec::new();
        for request in &requests {
            sources.extend(self.fetch_sources(request, retries).await?);
        }
        if sources.is_empty() {
            return Err(Error::Parse(format!(
                "player API returned no sources for {}",
                page_url
            )));
        }

        Ok(EpisodeDescriptor {
            page_url: page_url.clone(),
            show_title: parsed.show_title,
            season_hint: parsed.season_hint,
            episode_label: parsed.episode_label,
            sources,
        })
    }

    /// Exchange one `data-apireq` payload for the sources it unlocks
    ///
    /// The payload is already percent-encoded on the page and is sent verbatim.
    async fn fetch_sources(&self, apireq: &str, retries: &AtomicU32) -> Result<Vec<RawSource>> {
        let body = format!("d={}", apireq);
        let response = self
            .http
            .post_form(&self.api_endpoint, &body, retries)
            .await?;

        let player: PlayerResponse = serde_json::from_str(&response.body)
            .map_err(|e| Error::Parse(format!("unexpected player API response: {}", e)))?;

        let mut sources = Vec::with_capacity(player.s.len());
        for source in player.s {
            let Some(src) = source.src.filter(|s| !s.trim().is_empty()) else {
                continue;
            };
            let url = self.api_endpoint.join(src.trim()).map_err(|e| {
                Error::Parse(format!("invalid source URL '{}': {}", src, e))
            })?;
            sources.push(RawSource {
                url,
                mime_type: source.mime,
                cookie: response.cookie.clone(),
            });
        }
        Ok(sources)
    }
}
