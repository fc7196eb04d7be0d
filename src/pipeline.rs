use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ExtractionError, FetchError, PageError};
use crate::extract::Extractors;
use crate::fetch::{HttpSessions, PageFetcher, SessionFactory};
use crate::pagination;
use crate::record::{assemble, AssembledRecord};
use crate::schema::FieldSchema;
use crate::settings::Settings;
use crate::sink::{self, Sink};

const CHANNEL_CAPACITY: usize = 64;

/// Per-card processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Fetching,
    DetailParsed,
    SpecsFetching,
    SpecsParsed,
    Assembled,
    Persisted,
    Abandoned,
}

impl CardState {
    pub fn can_advance_to(self, next: CardState) -> bool {
        use CardState::*;
        matches!(
            (self, next),
            (Fetching, DetailParsed)
                | (Fetching, Abandoned)
                | (DetailParsed, SpecsFetching)
                | (DetailParsed, Assembled)
                | (DetailParsed, Abandoned)
                | (SpecsFetching, SpecsParsed)
                | (SpecsFetching, Assembled)
                | (SpecsFetching, Abandoned)
                | (SpecsParsed, Assembled)
                | (Assembled, Persisted)
        )
    }
}

/// A detail page to visit, plus the specs page once the detail is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardTask {
    pub detail_url: String,
    pub specs_url: Option<String>,
}

impl CardTask {
    pub fn new(detail_url: impl Into<String>) -> Self {
        CardTask {
            detail_url: detail_url.into(),
            specs_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    Fetch(FetchError),
    Extraction(ExtractionError),
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbandonReason::Fetch(e) => write!(f, "detail fetch: {}", e),
            AbandonReason::Extraction(e) => write!(f, "detail parse: {}", e),
        }
    }
}

/// What happened to one card. `trail` lists every state it passed through.
#[derive(Debug)]
pub struct CardOutcome {
    pub task: CardTask,
    pub trail: Vec<CardState>,
    pub record: Option<AssembledRecord>,
    pub abandoned: Option<AbandonReason>,
}

impl CardOutcome {
    fn start(task: CardTask) -> Self {
        CardOutcome {
            task,
            trail: vec![CardState::Fetching],
            record: None,
            abandoned: None,
        }
    }

    pub fn state(&self) -> CardState {
        self.trail.last().copied().unwrap_or(CardState::Fetching)
    }

    fn advance(&mut self, next: CardState) {
        debug_assert!(
            self.state().can_advance_to(next),
            "illegal card transition {:?} -> {:?}",
            self.state(),
            next
        );
        debug!("{}: {:?} -> {:?}", self.task.detail_url, self.state(), next);
        self.trail.push(next);
    }

    fn abandon(mut self, reason: AbandonReason) -> Self {
        warn!(
            "Abandoning card {} in {:?}: {}",
            self.task.detail_url,
            self.state(),
            reason
        );
        self.advance(CardState::Abandoned);
        self.abandoned = Some(reason);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pages_crawled: usize,
    pub pages_interrupted: usize,
    pub pages_abandoned: usize,
    pub cards_seen: usize,
    pub cards_persisted: usize,
    pub cards_abandoned: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Pacing {
    pub card_delay: Duration,
    pub specs_delay: Duration,
    pub page_delay: Duration,
}

enum CrawlEvent {
    Card(CardOutcome),
    PageFinished { url: String, cards: usize },
    PageInterrupted { url: String, done: usize, total: usize },
    PageAbandoned { url: String, error: PageError },
}

/// Drives listing pages and their cards through extraction and assembly.
#[derive(Clone)]
pub struct Crawler {
    schema: Arc<FieldSchema>,
    extractors: Extractors,
    sessions: Arc<dyn SessionFactory>,
    pacing: Pacing,
    page_workers: usize,
}

impl Crawler {
    pub fn new(schema: FieldSchema, extractors: Extractors, sessions: Arc<dyn SessionFactory>) -> Self {
        Crawler {
            schema: Arc::new(schema),
            extractors,
            sessions,
            pacing: Pacing::default(),
            page_workers: 1,
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_page_workers(mut self, workers: usize) -> Self {
        self.page_workers = workers.max(1);
        self
    }

    /// Crawl `page_urls`, appending every assembled record to `sink`.
    ///
    /// Card and page failures are counted and logged. A sink failure cancels
    /// all workers and is returned as the run's error.
    pub async fn run(
        &self,
        page_urls: Vec<String>,
        sink: &mut dyn Sink,
        cancel: &CancellationToken,
        pb: &ProgressBar,
    ) -> Result<RunSummary> {
        let cancel = cancel.child_token();
        let (tx, mut rx) = mpsc::channel::<CrawlEvent>(CHANNEL_CAPACITY);
        let dispatcher = tokio::spawn(self.clone().dispatch(page_urls, tx, cancel.clone()));

        let mut summary = RunSummary::default();

        while let Some(event) = rx.recv().await {
            match event {
                CrawlEvent::Card(mut card) => {
                    summary.cards_seen += 1;
                    let Some(record) = card.record.take() else {
                        summary.cards_abandoned += 1;
                        continue;
                    };
                    if let Err(e) = sink.append(&record, &self.schema) {
                        error!("Sink append failed for {}: {}", card.task.detail_url, e);
                        cancel.cancel();
                        return Err(e).with_context(|| {
                            format!("Failed to persist {}", card.task.detail_url)
                        });
                    }
                    card.advance(CardState::Persisted);
                    summary.cards_persisted += 1;
                    pb.set_message(format!("{} saved", summary.cards_persisted));
                }
                CrawlEvent::PageFinished { url, cards } => {
                    info!("Finished {} ({} cards)", url, cards);
                    summary.pages_crawled += 1;
                    pb.inc(1);
                }
                CrawlEvent::PageInterrupted { url, done, total } => {
                    info!("Interrupted {} after {} of {} cards", url, done, total);
                    summary.pages_interrupted += 1;
                    pb.inc(1);
                }
                CrawlEvent::PageAbandoned { url, error: reason } => {
                    match reason {
                        PageError::EmptyResult => error!(
                            "No cards on {}: the site may be blocking this client, \
                             or the listing is genuinely empty. Page skipped.",
                            url
                        ),
                        other => warn!("Skipping page {}: {}", url, other),
                    }
                    summary.pages_abandoned += 1;
                    pb.inc(1);
                }
            }
        }

        dispatcher.await.context("Page dispatcher panicked")?;
        Ok(summary)
    }

    async fn dispatch(self, page_urls: Vec<String>, tx: mpsc::Sender<CrawlEvent>, cancel: CancellationToken) {
        let workers = Arc::new(Semaphore::new(self.page_workers));
        let last = page_urls.len();
        let mut handles = Vec::with_capacity(last);

        for (i, url) in page_urls.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&workers).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let crawler = self.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();
            let rest_after = i + 1 < last;
            handles.push(tokio::spawn(async move {
                crawler.crawl_page(&url, &tx, &cancel).await;
                if rest_after {
                    pace(crawler.pacing.page_delay, &cancel).await;
                }
                drop(permit);
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Page worker failed: {}", e);
            }
        }
    }

    /// One listing page: open a session, discover cards, drive each card.
    /// The session lives exactly as long as this call.
    async fn crawl_page(&self, page_url: &str, tx: &mpsc::Sender<CrawlEvent>, cancel: &CancellationToken) {
        let abandon = |error: PageError| CrawlEvent::PageAbandoned {
            url: page_url.to_string(),
            error,
        };

        let session = match self.sessions.open_session() {
            Ok(s) => s,
            Err(e) => {
                let _ = tx.send(abandon(PageError::Session(e))).await;
                return;
            }
        };

        let cards = match self.discover_cards(session.as_ref(), page_url).await {
            Ok(cards) => cards,
            Err(e) => {
                let _ = tx.send(abandon(e)).await;
                return;
            }
        };

        let total = cards.len();
        info!("Page {}: {} cards", page_url, total);

        let mut done = 0;
        for task in cards {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = self.process_card(session.as_ref(), task).await;
            if tx.send(CrawlEvent::Card(outcome)).await.is_err() {
                return;
            }
            done += 1;
            if done < total && !pace(self.pacing.card_delay, cancel).await {
                break;
            }
        }

        let url = page_url.to_string();
        let event = if done == total {
            CrawlEvent::PageFinished { url, cards: total }
        } else {
            CrawlEvent::PageInterrupted { url, done, total }
        };
        let _ = tx.send(event).await;
    }

    /// Fetch a listing page and turn its cards into tasks. Zero cards is an error.
    pub async fn discover_cards(&self, session: &dyn PageFetcher, page_url: &str) -> Result<Vec<CardTask>, PageError> {
        let markup = session.fetch(page_url).await?;
        let urls = self.extractors.listing.extract_card_urls(&markup);
        if urls.is_empty() {
            return Err(PageError::EmptyResult);
        }
        Ok(urls.into_iter().map(CardTask::new).collect())
    }

    /// Run one card from `Fetching` to `Assembled` or `Abandoned`.
    pub async fn process_card(&self, session: &dyn PageFetcher, task: CardTask) -> CardOutcome {
        let url = task.detail_url.clone();
        let mut card = CardOutcome::start(task);

        let markup = match session.fetch(&url).await {
            Ok(m) => m,
            Err(e) => return card.abandon(AbandonReason::Fetch(e)),
        };
        card.advance(CardState::DetailParsed);

        let detail = match self.extractors.detail.extract_detail(&markup, &url) {
            Ok(d) => d,
            Err(e) => return card.abandon(AbandonReason::Extraction(e)),
        };
        card.task.specs_url = detail.specs_url.clone();
        debug!("{}: {} detail fields", url, detail.record.len());

        let mut parts = vec![detail.record];
        if let Some(specs_url) = detail.specs_url {
            tokio::time::sleep(self.pacing.specs_delay).await;
            card.advance(CardState::SpecsFetching);
            match session.fetch(&specs_url).await {
                Ok(specs) => {
                    card.advance(CardState::SpecsParsed);
                    let part = self.extractors.specs.extract_specs(&specs);
                    if part.is_empty() {
                        debug!("No technical fields on {}", specs_url);
                    }
                    parts.push(part);
                }
                Err(e) => warn!(
                    "Specs fetch failed for {} ({}), keeping detail fields only: {}",
                    url, specs_url, e
                ),
            }
        }

        let dropped: Vec<&str> = parts
            .iter()
            .flat_map(|p| p.keys())
            .filter(|k| !self.schema.contains(k))
            .collect();
        if !dropped.is_empty() {
            debug!("{}: ignoring fields outside the schema: {:?}", url, dropped);
        }

        let record = assemble(&self.schema, &parts);
        let absent = record.iter().filter(|(_, v)| v.is_absent()).count();
        card.advance(CardState::Assembled);
        debug!("{}: assembled, {} of {} fields absent", url, absent, record.len());
        card.record = Some(record);
        card
    }
}

/// Sleep for `delay` unless cancelled first. Returns false on cancellation.
async fn pace(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Crawl `page_count` listing pages of `region` with the configured site,
/// pacing, and sink.
pub async fn run_crawl(
    settings: &Settings,
    page_count: usize,
    region: &str,
    radius: u32,
    cancel: &CancellationToken,
    pb: &ProgressBar,
) -> Result<RunSummary> {
    let urls = pagination::page_urls(&settings.base_url, region, &settings.category, radius, page_count);
    let schema = FieldSchema::cars();
    let mut sink = sink::open(settings.sink, &settings.output, &schema)
        .with_context(|| format!("Failed to open output {}", settings.output.display()))?;

    let crawler = Crawler::new(
        schema,
        Extractors::avito(&settings.base_url)?,
        Arc::new(HttpSessions::from_settings(settings)),
    )
    .with_pacing(settings.pacing())
    .with_page_workers(settings.page_workers);

    crawler.run(urls, sink.as_mut(), cancel, pb).await
}
