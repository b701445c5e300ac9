pub mod window;

use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::client::StatsClient;
use crate::error::{Error, Result};
use crate::filter::{Filter, Granularity};
use crate::types::Rating;
use window::{day_windows, format_date, format_timestamp, Window};

/// Sources queried when a filter names none, in this order.
pub const DEFAULT_SOURCES: [&str; 2] = ["web", "facebook"];

/// How a metric's sub-queries are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// One sub-query per (day, source); rows are tagged with the window start.
    DayWindowed,
    /// One sub-query per source over the whole range; rows carry their own date.
    PerSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Labels,
    Pages,
    Feedback,
    Messages,
    Sessions,
    Fallbacks,
    Handovers,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::Labels,
        Metric::Pages,
        Metric::Feedback,
        Metric::Messages,
        Metric::Sessions,
        Metric::Fallbacks,
        Metric::Handovers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Labels => "labels",
            Metric::Pages => "pages",
            Metric::Feedback => "feedback",
            Metric::Messages => "messages",
            Metric::Sessions => "sessions",
            Metric::Fallbacks => "fallbacks",
            Metric::Handovers => "handovers",
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Metric::Labels | Metric::Pages | Metric::Feedback => Shape::DayWindowed,
            Metric::Messages | Metric::Sessions | Metric::Fallbacks | Metric::Handovers => {
                Shape::PerSource
            }
        }
    }

    fn columns(&self) -> &'static [&'static str] {
        match self {
            Metric::Labels => &["count", "id", "text"],
            Metric::Pages => &["host", "path", "sessions", "messages"],
            Metric::Feedback => &["type", "rating", "count", "ratio"],
            Metric::Messages | Metric::Sessions => &["count"],
            Metric::Fallbacks => &["count", "rate"],
            Metric::Handovers => &["requests", "requests_while_closed", "started", "ended"],
        }
    }

    pub fn header(&self) -> Vec<String> {
        ["date", "source"]
            .iter()
            .chain(self.columns())
            .map(|c| c.to_string())
            .collect()
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown metric {s:?}")))
    }
}

pub type Row = Vec<String>;

/// Header plus rows in canonical (window, source) order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Row>,
}

/// Consumer of a finished table, e.g. a CSV encoder.
pub trait RowSink {
    type Error;

    fn accept(&mut self, table: &Table) -> std::result::Result<(), Self::Error>;
}

/// One planned upstream call.
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery {
    pub window: Window,
    pub source: String,
    pub filter: Filter,
}

/// Splits a filter into per-window, per-source sub-queries and merges their
/// rows back together.
pub struct Exporter {
    client: Arc<StatsClient>,
    concurrency: usize,
    default_sources: Vec<String>,
}

impl Exporter {
    pub fn new(client: Arc<StatsClient>) -> Self {
        Self {
            client,
            concurrency: 1,
            default_sources: DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Upper bound on sub-queries in flight at once. Output order does not
    /// depend on it.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_default_sources(mut self, sources: Vec<String>) -> Self {
        if !sources.is_empty() {
            self.default_sources = sources;
        }
        self
    }

    /// Sub-queries for `filter` in the order their rows are emitted.
    /// Rejects an invalid range before anything is planned.
    pub fn plan(&self, filter: &Filter, metric: Metric) -> Result<Vec<SubQuery>> {
        let (from, to) = filter.validated_range()?;
        let sources = if filter.sources.is_empty() {
            &self.default_sources
        } else {
            &filter.sources
        };

        let windows = match metric.shape() {
            Shape::DayWindowed => day_windows(from, to),
            Shape::PerSource => vec![Window {
                start: from,
                end: to,
            }],
        };

        let mut plan = Vec::with_capacity(windows.len() * sources.len());
        for window in windows {
            for source in sources {
                plan.push(SubQuery {
                    window,
                    source: source.clone(),
                    filter: filter.narrowed(window.start, window.end, source),
                });
            }
        }
        Ok(plan)
    }

    /// Run every sub-query for `metric` and merge the rows. The first failure
    /// aborts the whole export and no rows are returned.
    pub async fn aggregate(
        &self,
        cancel: &CancellationToken,
        filter: &Filter,
        metric: Metric,
    ) -> Result<Table> {
        let plan = self.plan(filter, metric)?;
        let granularity = filter.granularity;
        tracing::debug!(
            metric = %metric,
            sub_queries = plan.len(),
            concurrency = self.concurrency,
            "starting export"
        );

        let batches: Vec<Vec<Row>> = stream::iter(plan)
            .map(|query| self.run(cancel, metric, granularity, query))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let rows: Vec<Row> = batches.into_iter().flatten().collect();
        tracing::info!(metric = %metric, rows = rows.len(), "export finished");

        Ok(Table {
            header: metric.header(),
            rows,
        })
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        metric: Metric,
        granularity: Granularity,
        query: SubQuery,
    ) -> Result<Vec<Row>> {
        match self.rows(cancel, metric, granularity, &query).await {
            Ok(rows) => Ok(rows),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(cause) => {
                tracing::warn!(
                    metric = %metric,
                    window = %query.window,
                    source = %query.source,
                    error = %cause,
                    "sub-query failed, aborting export"
                );
                Err(Error::Aggregation {
                    window: query.window,
                    source_name: query.source,
                    cause: Box::new(cause),
                })
            }
        }
    }

    async fn rows(
        &self,
        cancel: &CancellationToken,
        metric: Metric,
        granularity: Granularity,
        query: &SubQuery,
    ) -> Result<Vec<Row>> {
        let client = &self.client;
        let filter = Some(&query.filter);
        let source = query.source.as_str();
        let day = format_date(query.window.start, granularity);

        let rows = match metric {
            Metric::Labels => client
                .chat_labels(cancel, filter)
                .await?
                .into_iter()
                .map(|l| row(&day, source, [l.count.to_string(), l.id, l.text]))
                .collect(),
            Metric::Pages => client
                .page_statistics(cancel, filter)
                .await?
                .into_iter()
                .map(|p| {
                    row(
                        &day,
                        source,
                        [
                            p.host,
                            p.path,
                            p.sessions.to_string(),
                            p.messages.to_string(),
                        ],
                    )
                })
                .collect(),
            Metric::Feedback => {
                let feedback = client.aggregated_feedback(cancel, filter).await?;
                let rating_row = |kind: &str, r: Rating| {
                    row(
                        &day,
                        source,
                        [
                            kind.to_string(),
                            r.rating.to_string(),
                            r.count.to_string(),
                            format!("{:.2}", r.ratio),
                        ],
                    )
                };
                feedback
                    .binary
                    .into_iter()
                    .map(|r| rating_row("binary", r))
                    .chain(feedback.emojis.into_iter().map(|r| rating_row("emojis", r)))
                    .collect()
            }
            Metric::Messages => client
                .user_messages(cancel, filter)
                .await?
                .into_iter()
                .map(|c| {
                    let date = format_timestamp(c.date, granularity);
                    row(&date, source, [c.count.to_string()])
                })
                .collect(),
            Metric::Sessions => client
                .chat_sessions(cancel, filter)
                .await?
                .into_iter()
                .map(|c| {
                    let date = format_timestamp(c.date, granularity);
                    row(&date, source, [c.count.to_string()])
                })
                .collect(),
            Metric::Fallbacks => client
                .fallback_rate_time_series(cancel, filter)
                .await?
                .into_iter()
                .map(|c| {
                    let date = format_timestamp(c.date, granularity);
                    row(&date, source, [c.count.to_string(), c.rate.to_string()])
                })
                .collect(),
            Metric::Handovers => client
                .handovers_time_series(cancel, filter)
                .await?
                .into_iter()
                .map(|h| {
                    let date = format_timestamp(h.date, granularity);
                    let t = h.handovers;
                    row(
                        &date,
                        source,
                        [
                            t.requests.to_string(),
                            t.requests_while_closed.to_string(),
                            t.started.to_string(),
                            t.ended.to_string(),
                        ],
                    )
                })
                .collect(),
        };
        Ok(rows)
    }
}

fn row<const N: usize>(date: &str, source: &str, values: [String; N]) -> Row {
    let mut row = Vec::with_capacity(N + 2);
    row.push(date.to_string());
    row.push(source.to_string());
    row.extend(values);
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::ApiRequest;
    use crate::testing::{json_response, stats_client, ScriptedTransport};
    use chrono::NaiveDate;
    use reqwest::StatusCode;
    use std::time::Duration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn param(request: &ApiRequest, key: &str) -> String {
        request
            .url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    }

    /// Answers every labels call with one label naming its window and source.
    fn echo_labels() -> ScriptedTransport {
        ScriptedTransport::responding(|request| {
            let body = format!(
                r#"{{"data":[{{"count":1,"id":"x","text":"{}/{}"}}]}}"#,
                param(request, "from"),
                param(request, "sources")
            );
            Ok(json_response(StatusCode::OK, &body))
        })
    }

    #[tokio::test]
    async fn test_day_windowed_order() {
        let transport = Arc::new(echo_labels());
        let exporter = Exporter::new(Arc::new(stats_client(transport.clone())));
        let filter =
            Filter::new(date(2021, 2, 1), date(2021, 2, 3)).with_sources(["web", "facebook"]);

        let table = exporter
            .aggregate(&CancellationToken::new(), &filter, Metric::Labels)
            .await
            .unwrap();

        let calls: Vec<(String, String, String)> = transport
            .requests()
            .iter()
            .map(|r| (param(r, "from"), param(r, "to"), param(r, "sources")))
            .collect();
        assert_eq!(
            calls,
            vec![
                ("2021-02-01".into(), "2021-02-02".into(), "web".into()),
                ("2021-02-01".into(), "2021-02-02".into(), "facebook".into()),
                ("2021-02-02".into(), "2021-02-03".into(), "web".into()),
                ("2021-02-02".into(), "2021-02-03".into(), "facebook".into()),
            ]
        );

        assert_eq!(table.header, vec!["date", "source", "count", "id", "text"]);
        let tags: Vec<(&str, &str)> = table
            .rows
            .iter()
            .map(|r| (r[0].as_str(), r[1].as_str()))
            .collect();
        assert_eq!(
            tags,
            vec![
                ("2021-02-01", "web"),
                ("2021-02-01", "facebook"),
                ("2021-02-02", "web"),
                ("2021-02-02", "facebook"),
            ]
        );
    }

    #[tokio::test]
    async fn test_order_survives_latency_variance() {
        // earlier windows answer slowest, so completion order is reversed
        let transport = Arc::new(echo_labels().with_delay(|request| {
            let day: u64 = param(request, "from")[8..].parse().unwrap();
            let penalty = if param(request, "sources") == "web" { 5 } else { 0 };
            Duration::from_millis(60 - day * 10 + penalty)
        }));
        let exporter =
            Exporter::new(Arc::new(stats_client(transport.clone()))).with_concurrency(8);
        let filter = Filter::new(date(2021, 2, 1), date(2021, 2, 5));

        let table = exporter
            .aggregate(&CancellationToken::new(), &filter, Metric::Labels)
            .await
            .unwrap();

        let texts: Vec<&str> = table.rows.iter().map(|r| r[4].as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "2021-02-01/web",
                "2021-02-01/facebook",
                "2021-02-02/web",
                "2021-02-02/facebook",
                "2021-02-03/web",
                "2021-02-03/facebook",
                "2021-02-04/web",
                "2021-02-04/facebook",
            ]
        );
    }

    #[tokio::test]
    async fn test_per_source_uses_full_range_and_row_dates() {
        let transport = Arc::new(ScriptedTransport::responding(|request| {
            let count = if param(request, "sources") == "web" { 7 } else { 3 };
            let body = format!(
                r#"{{"data":[
                    {{"count":{count},"date":"2021-02-01T00:00:00.000000"}},
                    {{"count":{count},"date":"2021-02-02T00:00:00.000000"}}
                ]}}"#
            );
            Ok(json_response(StatusCode::OK, &body))
        }));
        let exporter = Exporter::new(Arc::new(stats_client(transport.clone())));
        let filter = Filter::new(date(2021, 2, 1), date(2021, 2, 3));

        let table = exporter
            .aggregate(&CancellationToken::new(), &filter, Metric::Messages)
            .await
            .unwrap();

        let sent = transport.requests();
        assert_eq!(sent.len(), 2);
        for request in &sent {
            assert_eq!(param(request, "from"), "2021-02-01");
            assert_eq!(param(request, "to"), "2021-02-03");
        }
        assert_eq!(
            table.rows,
            vec![
                vec!["2021-02-01", "web", "7"],
                vec!["2021-02-02", "web", "7"],
                vec!["2021-02-01", "facebook", "3"],
                vec!["2021-02-02", "facebook", "3"],
            ]
        );
    }

    #[tokio::test]
    async fn test_hourly_granularity_formats_row_dates() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(json_response(
            StatusCode::OK,
            r#"{"data":[{"date":"2021-02-01T13:00:00.000000","requests":2,"requests_while_closed":1,"started":1,"ended":1}]}"#,
        ))]));
        let exporter = Exporter::new(Arc::new(stats_client(transport)));
        let filter = Filter::new(date(2021, 2, 1), date(2021, 2, 2))
            .with_granularity(Granularity::Hour)
            .with_sources(["web"]);

        let table = exporter
            .aggregate(&CancellationToken::new(), &filter, Metric::Handovers)
            .await
            .unwrap();
        assert_eq!(
            table.rows,
            vec![vec!["2021-02-01 13:00", "web", "2", "1", "1", "1"]]
        );
    }

    #[tokio::test]
    async fn test_feedback_rows() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(json_response(
            StatusCode::OK,
            r#"{"data":{"binary":[{"count":3,"rating":1,"ratio":0.75}],"emojis":[{"count":1,"rating":5,"ratio":0.25}]}}"#,
        ))]));
        let exporter = Exporter::new(Arc::new(stats_client(transport)));
        let filter = Filter::new(date(2021, 2, 1), date(2021, 2, 2)).with_sources(["web"]);

        let table = exporter
            .aggregate(&CancellationToken::new(), &filter, Metric::Feedback)
            .await
            .unwrap();
        assert_eq!(
            table.rows,
            vec![
                vec!["2021-02-01", "web", "binary", "1", "3", "0.75"],
                vec!["2021-02-01", "web", "emojis", "5", "1", "0.25"],
            ]
        );
    }

    #[tokio::test]
    async fn test_first_failure_aborts_with_no_rows() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(json_response(
                StatusCode::OK,
                r#"{"data":[{"count":1,"id":"a","text":"ok"}]}"#,
            )),
            Ok(json_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")),
            Ok(json_response(StatusCode::OK, r#"{"data":[]}"#)),
        ]));
        let exporter = Exporter::new(Arc::new(stats_client(transport.clone())));
        let filter =
            Filter::new(date(2021, 2, 1), date(2021, 2, 3)).with_sources(["web", "facebook"]);

        let err = exporter
            .aggregate(&CancellationToken::new(), &filter, Metric::Labels)
            .await
            .unwrap_err();

        match &err {
            Error::Aggregation {
                window,
                source_name,
                cause,
            } => {
                assert_eq!(window.start, date(2021, 2, 1));
                assert_eq!(source_name, "facebook");
                assert!(matches!(
                    cause.as_ref(),
                    Error::Upstream { status: 500, body } if body == "internal error"
                ));
            }
            other => panic!("expected aggregation error, got {other:?}"),
        }
        assert_eq!(transport.calls(), 2, "no calls after the first failure");
    }

    #[tokio::test]
    async fn test_equal_bounds_rejected_before_any_call() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let exporter = Exporter::new(Arc::new(stats_client(transport.clone())));
        let filter = Filter::new(date(2021, 2, 1), date(2021, 2, 1));

        for metric in Metric::ALL {
            let err = exporter
                .aggregate(&CancellationToken::new(), &filter, metric)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_discards_rows() {
        let transport = Arc::new(
            echo_labels().with_delay(|request| {
                if param(request, "from") == "2021-02-01" {
                    Duration::ZERO
                } else {
                    Duration::from_secs(3600)
                }
            }),
        );
        let exporter = Exporter::new(Arc::new(stats_client(transport)));
        let filter = Filter::new(date(2021, 2, 1), date(2021, 2, 4));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = exporter
            .aggregate(&cancel, &filter, Metric::Labels)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_plan_defaults_sources() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let exporter = Exporter::new(Arc::new(stats_client(transport)));
        let filter = Filter::new(date(2021, 2, 1), date(2021, 2, 2)).with_limit(10);

        let plan = exporter.plan(&filter, Metric::Pages).unwrap();
        let sources: Vec<&str> = plan.iter().map(|q| q.source.as_str()).collect();
        assert_eq!(sources, vec!["web", "facebook"]);
        assert!(plan.iter().all(|q| q.filter.limit == 10));
        assert!(filter.sources.is_empty(), "caller's filter is untouched");

        let exporter = exporter.with_default_sources(vec!["app".to_string()]);
        let plan = exporter.plan(&filter, Metric::Pages).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].filter.sources, vec!["app".to_string()]);
    }

    #[test]
    fn test_metric_parse_and_header() {
        for metric in Metric::ALL {
            assert_eq!(metric.as_str().parse::<Metric>().unwrap(), metric);
            let header = metric.header();
            assert_eq!(&header[..2], &["date", "source"]);
        }
        assert!(matches!("bogus".parse::<Metric>(), Err(Error::Validation(_))));
        assert_eq!(Metric::Labels.shape(), Shape::DayWindowed);
        assert_eq!(Metric::Messages.shape(), Shape::PerSource);
    }
}
