use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use scada_md::source::{PayloadDocument, RawPayload, ScadaSource, SourceError};
use scada_md::Channel;

/// Canned response for one `(channel, date)`.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// One or more decoded documents, as a current file or archive entries.
    Documents(Vec<Value>),
    Status(u16),
    Transport(String),
    Archive(String),
}

/// Source that replays scripted responses and records every call.
/// Unscripted dates answer 404.
#[derive(Default)]
pub struct ScriptedSource {
    responses: Mutex<HashMap<(Channel, NaiveDate), Scripted>>,
    calls: Mutex<Vec<(Channel, NaiveDate)>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps this long, so concurrent fetches overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn script(&self, channel: Channel, date: NaiveDate, response: Scripted) {
        guard(&self.responses).insert((channel, date), response);
    }

    pub fn calls(&self) -> Vec<(Channel, NaiveDate)> {
        guard(&self.calls).clone()
    }

    pub fn fetches_for(&self, date: NaiveDate) -> usize {
        guard(&self.calls).iter().filter(|(_, d)| *d == date).count()
    }

    /// Highest number of fetches observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(&self, channel: Channel, date: NaiveDate) -> Result<RawPayload, SourceError> {
        guard(&self.calls).push((channel, date));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let scripted = guard(&self.responses).get(&(channel, date)).cloned();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let url = format!("scripted://{}/{}", channel.as_str(), date);
        match scripted {
            None => Err(SourceError::Status { code: 404, url }),
            Some(Scripted::Status(code)) => Err(SourceError::Status { code, url }),
            Some(Scripted::Transport(message)) => Err(SourceError::Transport { url, message }),
            Some(Scripted::Archive(msg)) => Err(SourceError::Archive(msg)),
            Some(Scripted::Documents(docs)) => Ok(RawPayload {
                channel,
                trading_date: date,
                documents: docs
                    .into_iter()
                    .enumerate()
                    .map(|(i, body)| PayloadDocument {
                        name: format!("scripted-{date}-{i}.json"),
                        body,
                    })
                    .collect(),
            }),
        }
    }
}

#[async_trait]
impl ScadaSource for ScriptedSource {
    fn source_name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_current(&self, date: NaiveDate) -> Result<RawPayload, SourceError> {
        self.respond(Channel::Current, date).await
    }

    async fn fetch_historical(&self, date: NaiveDate) -> Result<RawPayload, SourceError> {
        self.respond(Channel::Historical, date).await
    }
}
