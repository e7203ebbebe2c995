use std::time::Duration;

use duebell_shared::api::{EVENTS_PATH, ServerEvent};
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use tokio::sync::broadcast;

use crate::AppError;

/// Background SSE listener with broadcast fan-out.
///
/// Reconnects forever with doubling backoff capped at 30s. Push is an
/// optimization; the poll tick remains the source of truth when the
/// stream is down.
pub struct EventHub {
    tx: broadcast::Sender<ServerEvent>,
    task: tokio::task::JoinHandle<()>,
}

impl EventHub {
    pub fn new(server_base: &str, token: &str) -> Result<Self, AppError> {
        let base = crate::config::normalize_server_url(server_base);
        if base.is_empty() {
            return Err(AppError::Config("server_url empty".into()));
        }
        let url = to_events_url(&base, token)?;
        let (tx, _) = broadcast::channel(32);
        let task = tokio::spawn(run_stream(url, tx.clone()));
        Ok(Self { tx, task })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

async fn run_stream(url: String, tx: broadcast::Sender<ServerEvent>) {
    let client = reqwest::Client::new();
    let mut backoff_secs = 1u64;
    loop {
        match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!("SSE: connected");
                backoff_secs = 1;
                let mut stream = resp.bytes_stream().eventsource();
                while let Some(ev) = stream.next().await {
                    match ev {
                        Ok(msg) => {
                            if msg.data.is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<ServerEvent>(&msg.data) {
                                Ok(event) => {
                                    // send only fails with nobody subscribed
                                    let _ = tx.send(event);
                                }
                                Err(e) => {
                                    tracing::debug!(error=%e, "SSE: ignoring unrecognized payload");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error=%e, "SSE read error");
                            break;
                        }
                    }
                }
            }
            Ok(resp) => {
                tracing::warn!(status=%resp.status(), "SSE: connect rejected");
            }
            Err(e) => {
                tracing::warn!(error=%e, "SSE: connect failed");
            }
        }
        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
        backoff_secs = std::cmp::min(backoff_secs * 2, 30);
    }
}

fn to_events_url(http_base: &str, token: &str) -> Result<String, AppError> {
    let mut u = url::Url::parse(http_base)
        .map_err(|e| AppError::Config(format!("invalid server_url: {e}")))?;
    // keep http/https
    let mut path = u.path().trim_end_matches('/').to_string();
    path.push_str(EVENTS_PATH);
    u.set_path(&path);
    let mut qp = u.query_pairs_mut();
    qp.clear();
    qp.append_pair("token", token);
    drop(qp);
    Ok(u.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_url_carries_token_query() {
        let url = to_events_url("http://h:8080", "t0k&n").unwrap();
        assert_eq!(url, "http://h:8080/api/v1/events?token=t0k%26n");
    }

    #[test]
    fn events_url_respects_base_path() {
        let url = to_events_url("https://h/duebell/", "t").unwrap();
        assert_eq!(url, "https://h/duebell/api/v1/events?token=t");
    }
}
