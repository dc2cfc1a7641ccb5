//! Notification fan-out (§4.7): formats per-operation events and per-run
//! summaries, dispatches them to whatever sinks a given event kind is
//! configured with, and groups per-function events once they exceed a
//! threshold so a noisy evaluator doesn't flood a webhook.
//!
//! Grounded in `webhooks.py`'s `Webhooks` class (per-kind sink lists,
//! `_request`'s per-sink-type branching, the "trigger is not enabled"
//! warning carve-out) and `config.py::send_notifications`/`notify` (the
//! function-key substring lookup that decides which sink list an event
//! routes to).

use std::collections::HashMap;

use reqwest::Client;
use serde_json::{json, Value};

use crate::config::{AppriseConfig, BhdConfig, NotifiarrConfig, Webhooks};

/// Per-run event grouping threshold (`webhooks.py::GROUP_NOTIFICATION_LIMIT`).
/// Above this many individual events for one function in a single run, the
/// fan-out collapses them into a single grouped event instead of posting
/// one per torrent.
pub const GROUP_NOTIFICATION_LIMIT: usize = 5;

/// A single per-operation event. `function` is the key §6 uses to select a
/// sink list (`config.webhooks.function`); `grouping` is the key (category,
/// tag, or share-limit group name) events are collapsed by once the count
/// for a function exceeds `GROUP_NOTIFICATION_LIMIT`.
#[derive(Debug, Clone)]
pub struct Event {
    pub function: String,
    pub title: String,
    pub body: String,
    pub torrents: Vec<String>,
    pub grouping: Option<String>,
    pub extra: HashMap<String, Value>,
}

impl Event {
    pub fn new(function: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        Event {
            function: function.into(),
            title: title.into(),
            body: body.into(),
            torrents: Vec::new(),
            grouping: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_torrent(mut self, name: impl Into<String>) -> Self {
        self.torrents.push(name.into());
        self
    }

    pub fn with_grouping(mut self, key: impl Into<String>) -> Self {
        self.grouping = Some(key.into());
        self
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    fn to_json(&self) -> Value {
        let mut payload = json!({
            "function": self.function,
            "title": self.title,
            "body": self.body,
            "torrents": self.torrents,
        });
        if let Some(obj) = payload.as_object_mut() {
            for (k, v) in &self.extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        payload
    }
}

/// Result of posting to a single sink. A "trigger not enabled" hosted-sink
/// response is a warning, not an error (§4.7 Failure).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    Warned(String),
    Failed(String),
}

/// Fan-out dispatcher. Holds the sink configuration and the shared HTTP
/// client; `qbt_host` and `instance` are folded into the hosted-sink
/// payload the way `notifiarr.py::get_url` folds them into its params.
pub struct NotificationFanout {
    pub webhooks: Webhooks,
    pub notifiarr: Option<NotifiarrConfig>,
    pub apprise: Option<AppriseConfig>,
    #[allow(dead_code)]
    pub bhd: Option<BhdConfig>,
    pub qbt_host: String,
    client: Client,
}

impl NotificationFanout {
    pub fn new(
        webhooks: Webhooks,
        notifiarr: Option<NotifiarrConfig>,
        apprise: Option<AppriseConfig>,
        bhd: Option<BhdConfig>,
        qbt_host: String,
    ) -> Self {
        NotificationFanout {
            webhooks,
            notifiarr,
            apprise,
            bhd,
            qbt_host,
            client: Client::new(),
        }
    }

    /// Dispatches a run-start event to the `run_start` sink list.
    pub async fn run_start(&self, dry_run: bool) {
        if self.webhooks.run_start.is_empty() {
            return;
        }
        let prefix = if dry_run { "Dry-" } else { "" };
        let event = Event::new("run_start", "", format!("Starting {prefix}Run"));
        self.dispatch_to(&self.webhooks.run_start, &event).await;
    }

    /// Dispatches a run-end summary event to the `run_end` sink list.
    pub async fn run_end(&self, body: String, run_time_seconds: f64) {
        if self.webhooks.run_end.is_empty() {
            return;
        }
        let event = Event::new("run_end", "", body).with_extra("run_time_seconds", run_time_seconds);
        self.dispatch_to(&self.webhooks.run_end, &event).await;
    }

    /// Error/warning channel: every *Config invalid*, *Client auth failed*,
    /// and *threshold exceeded* condition goes through here (§7).
    pub async fn error(&self, text: &str, function: Option<&str>, critical: bool) {
        if self.webhooks.error.is_empty() {
            tracing::warn!(function, critical, "{text}");
            return;
        }
        let mut event = Event::new("run_error", format!("{} Error", function.unwrap_or("Run")), text);
        event = event.with_extra("critical", critical);
        if let Some(f) = function {
            event = event.with_extra("function_error", f);
        }
        self.dispatch_to(&self.webhooks.error, &event).await;
    }

    /// Routes a per-operation event to whichever configured function key is
    /// a substring of `event.function` (`config.py::send_notifications`'s
    /// first-match lookup), grouping when the caller has accumulated more
    /// than `GROUP_NOTIFICATION_LIMIT` events sharing a grouping key.
    pub async fn notify(&self, events: Vec<Event>) {
        let Some(sinks) = self.sinks_for_function(&events) else {
            return;
        };
        if sinks.is_empty() {
            return;
        }

        if events.len() > GROUP_NOTIFICATION_LIMIT {
            for grouped in group_events(events) {
                self.dispatch_to(sinks, &grouped).await;
            }
        } else {
            for event in &events {
                self.dispatch_to(sinks, event).await;
            }
        }
    }

    fn sinks_for_function(&self, events: &[Event]) -> Option<&Vec<String>> {
        let function = events.first()?.function.as_str();
        self.webhooks
            .function
            .iter()
            .find(|(key, _)| function.contains(key.as_str()))
            .map(|(_, sinks)| sinks)
    }

    async fn dispatch_to(&self, sinks: &[String], event: &Event) {
        for sink in sinks {
            let outcome = self.dispatch_one(sink, event).await;
            match outcome {
                DispatchOutcome::Delivered => {}
                DispatchOutcome::Warned(msg) => tracing::debug!(sink, "{msg}"),
                DispatchOutcome::Failed(msg) => tracing::warn!(sink, "notification sink failed: {msg}"),
            }
        }
    }

    async fn dispatch_one(&self, sink: &str, event: &Event) -> DispatchOutcome {
        match sink {
            "notifiarr" => self.dispatch_notifiarr(event).await,
            "apprise" => self.dispatch_apprise(event).await,
            url => self.dispatch_generic(url, event).await,
        }
    }

    async fn dispatch_generic(&self, url: &str, event: &Event) -> DispatchOutcome {
        match self.client.post(url).json(&event.to_json()).send().await {
            Ok(resp) => classify_response(resp.status().as_u16(), resp.text().await.unwrap_or_default()),
            Err(e) => DispatchOutcome::Failed(e.to_string()),
        }
    }

    async fn dispatch_notifiarr(&self, event: &Event) -> DispatchOutcome {
        let Some(cfg) = &self.notifiarr else {
            return DispatchOutcome::Failed("notifiarr sink configured but no notifiarr section present".into());
        };
        let url = format!("https://notifiarr.com/api/v1/notification/qbitManage/{}", cfg.apikey);
        let mut payload = event.to_json();
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("qbit_client".to_string(), json!(self.qbt_host));
            obj.insert("instance".to_string(), json!(cfg.instance));
        }
        match self.client.post(&url).json(&payload).send().await {
            Ok(resp) => classify_response(resp.status().as_u16(), resp.text().await.unwrap_or_default()),
            Err(e) => DispatchOutcome::Failed(e.to_string()),
        }
    }

    async fn dispatch_apprise(&self, event: &Event) -> DispatchOutcome {
        let Some(cfg) = &self.apprise else {
            return DispatchOutcome::Failed("apprise sink configured but no apprise section present".into());
        };
        let payload = json!({
            "urls": cfg.notify_url.join(","),
            "body": event.body,
            "title": event.title,
        });
        let url = format!("{}/notify", cfg.api_url);
        match self.client.post(&url).json(&payload).send().await {
            Ok(resp) => classify_response(resp.status().as_u16(), resp.text().await.unwrap_or_default()),
            Err(e) => DispatchOutcome::Failed(e.to_string()),
        }
    }
}

/// A non-2xx hosted-sink response whose body says "trigger is not enabled"
/// is a warning, not a failure (§4.7 Failure).
fn classify_response(status: u16, body: String) -> DispatchOutcome {
    let lowered = body.to_lowercase();
    if lowered.contains("trigger is not enabled") || lowered.contains("trigger not enabled") {
        return DispatchOutcome::Warned(body);
    }
    if (200..300).contains(&status) {
        DispatchOutcome::Delivered
    } else {
        DispatchOutcome::Failed(format!("status {status}: {body}"))
    }
}

/// Collapses events sharing a `grouping` key into one combined event per
/// key, preserving the function name of the first event in each group.
fn group_events(events: Vec<Event>) -> Vec<Event> {
    let mut groups: HashMap<String, Event> = HashMap::new();
    let mut ungrouped = Vec::new();

    for event in events {
        match event.grouping.clone() {
            Some(key) => {
                let entry = groups.entry(key.clone()).or_insert_with(|| {
                    Event::new(event.function.clone(), event.title.clone(), String::new()).with_grouping(key)
                });
                entry.torrents.extend(event.torrents.iter().cloned());
                if !entry.body.is_empty() {
                    entry.body.push('\n');
                }
                entry.body.push_str(&event.body);
            }
            None => ungrouped.push(event),
        }
    }

    let mut result: Vec<Event> = groups.into_values().collect();
    result.extend(ungrouped);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn webhooks_with(function: &str, sinks: Vec<&str>) -> Webhooks {
        let mut map = StdHashMap::new();
        map.insert(function.to_string(), sinks.into_iter().map(String::from).collect());
        Webhooks {
            error: Vec::new(),
            run_start: Vec::new(),
            run_end: Vec::new(),
            function: map,
        }
    }

    #[test]
    fn sinks_for_function_matches_by_substring() {
        let fanout = NotificationFanout::new(
            webhooks_with("tag_tracker_error", vec!["https://example.test/hook"]),
            None,
            None,
            None,
            "http://localhost:8080".to_string(),
        );
        let events = vec![Event::new("tag_tracker_error", "t", "b")];
        let sinks = fanout.sinks_for_function(&events);
        assert_eq!(sinks, Some(&vec!["https://example.test/hook".to_string()]));
    }

    #[test]
    fn trigger_not_enabled_body_is_a_warning_not_a_failure() {
        let outcome = classify_response(400, "{\"details\":\"trigger is not enabled\"}".to_string());
        assert!(matches!(outcome, DispatchOutcome::Warned(_)));
    }

    #[test]
    fn success_status_is_delivered() {
        assert_eq!(classify_response(200, "{}".to_string()), DispatchOutcome::Delivered);
    }

    #[test]
    fn group_events_collapses_by_grouping_key() {
        let events = vec![
            Event::new("tag_update", "t", "a").with_grouping("movies").with_torrent("A"),
            Event::new("tag_update", "t", "b").with_grouping("movies").with_torrent("B"),
            Event::new("tag_update", "t", "c").with_grouping("tv").with_torrent("C"),
        ];
        let grouped = group_events(events);
        assert_eq!(grouped.len(), 2);
        let movies = grouped.iter().find(|e| e.grouping.as_deref() == Some("movies")).unwrap();
        assert_eq!(movies.torrents.len(), 2);
    }
}
