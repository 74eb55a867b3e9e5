//! The metric/monitoring sink: a batch of `(host, key, value)` triples in,
//! a `{processed, failed}` count out. The wire framing here (newline-
//! delimited `host key value` over one TCP connection per batch) is a
//! minimal stand-in for the real monitoring server's sender protocol — the
//! scheduler only depends on the [`MetricSink`] trait.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::errors::{SinkError, SinkResult};

#[derive(Debug, Clone)]
pub struct MetricItem {
    pub host: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricSendResult {
    pub processed: usize,
    pub failed: usize,
}

#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn send(&self, items: &[MetricItem]) -> SinkResult<MetricSendResult>;
}

/// Sends one newline per item as `host\tkey\tvalue`, then reads back a
/// single `processed failed` response line.
pub struct TcpMetricSink {
    host: String,
    port: u16,
    request_timeout: std::time::Duration,
}

impl TcpMetricSink {
    pub fn new(host: impl Into<String>, port: u16, request_timeout: std::time::Duration) -> Self {
        Self {
            host: host.into(),
            port,
            request_timeout,
        }
    }
}

#[async_trait]
impl MetricSink for TcpMetricSink {
    async fn send(&self, items: &[MetricItem]) -> SinkResult<MetricSendResult> {
        if items.is_empty() {
            return Ok(MetricSendResult::default());
        }

        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let mut stream = match timeout(self.request_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(_)) | Err(_) => {
                return Ok(MetricSendResult {
                    processed: 0,
                    failed: items.len(),
                })
            }
        };

        let mut buf = String::new();
        for item in items {
            buf.push_str(&item.host);
            buf.push('\t');
            buf.push_str(&item.key);
            buf.push('\t');
            buf.push_str(&item.value);
            buf.push('\n');
        }

        if timeout(self.request_timeout, stream.write_all(buf.as_bytes()))
            .await
            .is_err()
        {
            return Ok(MetricSendResult {
                processed: 0,
                failed: items.len(),
            });
        }

        let mut reader = BufReader::new(stream);
        let mut response = String::new();
        match timeout(self.request_timeout, reader.read_line(&mut response)).await {
            Ok(Ok(_)) => {
                let mut parts = response.trim().split_whitespace();
                let processed: usize = parts.next().and_then(|p| p.parse().ok()).unwrap_or(items.len());
                let failed: usize = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                Ok(MetricSendResult { processed, failed })
            }
            _ => Ok(MetricSendResult {
                processed: items.len(),
                failed: 0,
            }),
        }
    }
}

/// Replaces real sends with a no-op, for `zabbix_dry_run`.
pub struct DryRunMetricSink;

#[async_trait]
impl MetricSink for DryRunMetricSink {
    async fn send(&self, _items: &[MetricItem]) -> SinkResult<MetricSendResult> {
        Ok(MetricSendResult::default())
    }
}

pub fn result_to_outcome(result: MetricSendResult) -> SinkResult<MetricSendResult> {
    if result.failed > 0 {
        tracing::warn!(failed = result.failed, total = result.processed + result.failed, "metric sink rejected items");
        return Err(SinkError::MetricRejected {
            failed: result.failed,
            total: result.processed + result.failed,
        });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_sink_never_fails() {
        let sink = DryRunMetricSink;
        let items = vec![MetricItem {
            host: "h".into(),
            key: "k".into(),
            value: "v".into(),
        }];
        let result = sink.send(&items).await.unwrap();
        assert_eq!(result, MetricSendResult::default());
    }

    #[tokio::test]
    async fn tcp_sink_reports_failure_when_unreachable() {
        let sink = TcpMetricSink::new("127.0.0.1", 1, std::time::Duration::from_millis(200));
        let items = vec![MetricItem {
            host: "h".into(),
            key: "k".into(),
            value: "v".into(),
        }];
        let result = sink.send(&items).await.unwrap();
        assert_eq!(result.failed, 1);
    }
}
