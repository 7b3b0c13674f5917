//! Process-wide alert statistics and Prometheus metrics.
//!
//! Counters and gauges live in a registry owned by [`Statistics`]; the
//! human-readable `/stats` summary is rendered from the same metrics so the
//! two views never disagree.

use crate::resolution::ResolutionKind;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::collections::BTreeMap;

const HEADER: &str = "<b>DevPlatform COC Alerts Bot</b>";

/// Label used when a resolution has no responsible handle.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Alert counters, gauges and the registry exposing them.
pub struct Statistics {
    registry: Registry,
    app_start: IntGauge,
    last_alert: IntGauge,
    alerts_total: IntCounter,
    alerts_handled: IntCounterVec,
    alerts_errors: IntCounterVec,
    timezone: Tz,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub last_alert_at: Option<DateTime<Utc>>,
    pub alerts_total: u64,
    pub resolved: BTreeMap<ResolutionKind, u64>,
    pub errors: BTreeMap<String, u64>,
}

impl StatsSnapshot {
    pub fn resolved(&self, kind: ResolutionKind) -> u64 {
        self.resolved.get(&kind).copied().unwrap_or(0)
    }

    pub fn errors(&self, handler: &str) -> u64 {
        self.errors.get(handler).copied().unwrap_or(0)
    }
}

impl Statistics {
    /// Create the metrics and record the process start as now.
    pub fn new(timezone: Tz) -> prometheus::Result<Self> {
        let registry = Registry::new();

        let app_start = IntGauge::new(
            "app_start_timestamp_seconds",
            "UNIX timestamp of application start",
        )?;
        let last_alert = IntGauge::new(
            "last_alert_timestamp_seconds",
            "UNIX timestamp of last alert received",
        )?;
        let alerts_total = IntCounter::new("alerts_total", "Alerts received total")?;
        let alerts_handled = IntCounterVec::new(
            Opts::new("alerts_handled_total", "Alerts handled total"),
            &["resolution", "responsible"],
        )?;
        let alerts_errors = IntCounterVec::new(
            Opts::new("alerts_error_total", "Errors while handling alerts total"),
            &["handler"],
        )?;

        registry.register(Box::new(app_start.clone()))?;
        registry.register(Box::new(last_alert.clone()))?;
        registry.register(Box::new(alerts_total.clone()))?;
        registry.register(Box::new(alerts_handled.clone()))?;
        registry.register(Box::new(alerts_errors.clone()))?;

        let stats = Self {
            registry,
            app_start,
            last_alert,
            alerts_total,
            alerts_handled,
            alerts_errors,
            timezone,
        };
        stats.set_started_at(Utc::now());
        Ok(stats)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn set_started_at(&self, at: DateTime<Utc>) {
        self.app_start.set(at.timestamp());
    }

    pub fn set_last_alert_at(&self, at: DateTime<Utc>) {
        self.last_alert.set(at.timestamp());
    }

    /// Count one relayed alert and stamp the last-alert gauge.
    pub fn record_alert(&self, at: DateTime<Utc>) {
        self.alerts_total.inc();
        self.set_last_alert_at(at);
    }

    pub fn record_resolution(&self, kind: ResolutionKind, responsible: Option<&str>) {
        let responsible = responsible.filter(|r| !r.is_empty()).unwrap_or(UNKNOWN_LABEL);
        self.alerts_handled
            .with_label_values(&[kind.label(), responsible])
            .inc();
    }

    pub fn record_error(&self, handler: &str) {
        let handler = if handler.is_empty() { UNKNOWN_LABEL } else { handler };
        self.alerts_errors.with_label_values(&[handler]).inc();
    }

    pub fn alerts_total(&self) -> u64 {
        self.alerts_total.get()
    }

    /// Copy every counter. Concurrent increments may or may not be included.
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut resolved: BTreeMap<ResolutionKind, u64> =
            ResolutionKind::ALL.iter().map(|kind| (*kind, 0)).collect();
        for (labels, value) in counter_values(&self.alerts_handled) {
            let kind = labels
                .get("resolution")
                .and_then(|label| ResolutionKind::from_label(label));
            if let Some(kind) = kind {
                *resolved.entry(kind).or_default() += value;
            }
        }

        let mut errors = BTreeMap::new();
        for (labels, value) in counter_values(&self.alerts_errors) {
            if let Some(handler) = labels.get("handler") {
                *errors.entry(handler.clone()).or_default() += value;
            }
        }

        StatsSnapshot {
            started_at: from_timestamp(self.app_start.get()).unwrap_or_else(Utc::now),
            last_alert_at: Some(self.last_alert.get())
                .filter(|ts| *ts > 0)
                .and_then(from_timestamp),
            alerts_total: self.alerts_total.get(),
            resolved,
            errors,
        }
    }

    /// Render the `/stats` summary as of now.
    pub fn render(&self) -> String {
        self.render_at(Utc::now())
    }

    /// Render the `/stats` summary as of `now`.
    pub fn render_at(&self, now: DateTime<Utc>) -> String {
        let snapshot = self.snapshot();

        let mut out = String::new();
        out.push_str(HEADER);
        out.push_str("\n\n");
        out.push_str(&format!(
            "Uptime: {}\n\n",
            format_uptime(now - snapshot.started_at)
        ));

        let quiet_since = snapshot.last_alert_at.unwrap_or(snapshot.started_at);
        out.push_str(&format!(
            "Дней без алертов: {}\n",
            (now - quiet_since).num_days().max(0)
        ));
        if let Some(last) = snapshot.last_alert_at {
            let local = self.timezone.from_utc_datetime(&last.naive_utc());
            out.push_str(&format!(
                "Последний алерт: {}\n",
                local.format("%Y-%m-%d %H:%M:%S %Z")
            ));
        }
        out.push('\n');

        out.push_str(&format!(
            "Всего получено алертов - {}.\n",
            snapshot.alerts_total
        ));
        if snapshot.alerts_total > 0 {
            out.push_str("<b>Из них:</b>\n");
            for kind in ResolutionKind::ALL {
                out.push_str(&format!(
                    "{} - {}\n",
                    kind.summary_label(),
                    snapshot.resolved(kind)
                ));
            }
        }

        out
    }

    /// Prometheus text exposition of the registry.
    pub fn encode(&self) -> Result<String, coc_common::Error> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|e| coc_common::Error::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| coc_common::Error::Metrics(e.to_string()))
    }
}

fn from_timestamp(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

/// Flatten a counter vector into `(labels, value)` pairs.
fn counter_values(vec: &IntCounterVec) -> Vec<(BTreeMap<String, String>, u64)> {
    vec.collect()
        .iter()
        .flat_map(|family| family.get_metric().iter())
        .map(|metric| {
            let labels = metric
                .get_label()
                .iter()
                .map(|pair| (pair.get_name().to_string(), pair.get_value().to_string()))
                .collect();
            (labels, metric.get_counter().get_value() as u64)
        })
        .collect()
}

/// `1д 2ч 3м` past an hour, `4м 5с` below.
fn format_uptime(elapsed: chrono::Duration) -> String {
    let total = elapsed.num_seconds().max(0);

    if total >= 3600 {
        let days = total / 86_400;
        let hours = (total % 86_400) / 3600;
        let minutes = (total % 3600) / 60;
        format!("{days}д {hours}ч {minutes}м")
    } else {
        format!("{}м {}с", total / 60, total % 60)
    }
}
