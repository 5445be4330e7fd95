//! Routing rules for stream events.
//!
//! A [`RouteMatcher`] is compiled once from the configured rules and answers two
//! questions: does an event qualify for forwarding at all, and which recipients
//! should receive it.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use crate::config::{Recipient, RouteRule};
use crate::error::{Error, Result};
use crate::stream::event::GotifyMessage;

/// Path pattern that matches every event.
pub const WILDCARD_PATH: &str = "*";

static APP_ID_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)$").unwrap());

#[derive(Debug, Clone)]
struct CompiledRule {
    wildcard: bool,
    app_ids: BTreeSet<i64>,
    min_priority: Option<i64>,
    /// Resolved addresses; `None` means every configured recipient.
    openids: Option<Vec<String>>,
    names: Option<Vec<String>>,
}

impl CompiledRule {
    fn compile(index: usize, rule: &RouteRule, by_name: &HashMap<&str, &str>) -> Result<Self> {
        let mut wildcard = false;
        let mut app_ids: BTreeSet<i64> = rule.app_ids.iter().copied().collect();

        if let Some(path) = rule.path.as_deref().map(str::trim)
            && !path.is_empty()
        {
            if path == WILDCARD_PATH {
                wildcard = true;
            } else {
                let id = APP_ID_SUFFIX
                    .captures(path)
                    .and_then(|caps| caps[1].parse::<i64>().ok())
                    .ok_or_else(|| {
                        Error::config(format!(
                            "stream.routes[{index}]: path '{path}' must be '*' or end in an application id"
                        ))
                    })?;
                app_ids.insert(id);
            }
        }

        let (openids, names) = match &rule.recipients {
            None => (None, None),
            Some(names) => {
                let mut openids = Vec::with_capacity(names.len());
                for name in names {
                    let name = name.trim();
                    let openid = by_name.get(name).ok_or_else(|| {
                        Error::config(format!(
                            "stream.routes[{index}]: unknown recipient '{name}'"
                        ))
                    })?;
                    openids.push((*openid).to_string());
                }
                let names = names.iter().map(|n| n.trim().to_string()).collect();
                (Some(openids), Some(names))
            }
        };

        Ok(Self {
            wildcard,
            app_ids,
            min_priority: rule.min_priority,
            openids,
            names,
        })
    }

    fn applies_to(&self, app_id: i64, priority: i64) -> bool {
        let id_ok = self.app_ids.is_empty() || self.app_ids.contains(&app_id);
        let priority_ok = self.min_priority.is_none_or(|min| priority >= min);
        id_ok && priority_ok
    }

    fn describe(&self) -> String {
        let mut condition = if self.wildcard {
            "all messages".to_string()
        } else if self.app_ids.is_empty() {
            "any application".to_string()
        } else {
            let ids: Vec<String> = self.app_ids.iter().map(i64::to_string).collect();
            format!("application {}", ids.join(", "))
        };
        if let Some(min) = self.min_priority
            && !self.wildcard
        {
            condition.push_str(&format!(" with priority >= {min}"));
        }

        let target = match &self.names {
            None => "all recipients".to_string(),
            Some(names) if names.is_empty() => "nobody".to_string(),
            Some(names) => names.join(", "),
        };
        format!("{condition} -> {target}")
    }
}

/// Compiled, ordered routing rules.
#[derive(Debug, Clone)]
pub struct RouteMatcher {
    rules: Vec<CompiledRule>,
    /// Index of the first wildcard rule, which overrides every other rule.
    wildcard: Option<usize>,
    all_openids: Vec<String>,
}

impl RouteMatcher {
    /// Compile `rules` against the configured recipients.
    ///
    /// Fails on a malformed path or a recipient name that is not configured.
    pub fn new(rules: &[RouteRule], recipients: &[Recipient]) -> Result<Self> {
        let by_name: HashMap<&str, &str> = recipients
            .iter()
            .map(|r| (r.name.as_str(), r.openid.as_str()))
            .collect();

        let rules = rules
            .iter()
            .enumerate()
            .map(|(i, rule)| CompiledRule::compile(i, rule, &by_name))
            .collect::<Result<Vec<_>>>()?;
        let wildcard = rules.iter().position(|r| r.wildcard);

        Ok(Self {
            rules,
            wildcard,
            all_openids: recipients.iter().map(|r| r.openid.clone()).collect(),
        })
    }

    /// Whether any rule lets `event` through. With no rules nothing matches.
    pub fn matches(&self, event: &GotifyMessage) -> bool {
        if self.wildcard.is_some() {
            return true;
        }
        self.rules
            .iter()
            .any(|rule| rule.applies_to(event.appid, event.priority))
    }

    /// Addresses that should receive an event from `app_id` at `priority`.
    ///
    /// No rules means everyone. Otherwise the first matching rule decides, even
    /// when its recipient list is empty; no match means no delivery.
    pub fn resolve_recipients(&self, app_id: i64, priority: i64) -> Vec<String> {
        if self.rules.is_empty() {
            return self.all_openids.clone();
        }
        if let Some(index) = self.wildcard {
            return self.openids_of(&self.rules[index]);
        }
        self.rules
            .iter()
            .find(|rule| rule.applies_to(app_id, priority))
            .map(|rule| self.openids_of(rule))
            .unwrap_or_default()
    }

    fn openids_of(&self, rule: &CompiledRule) -> Vec<String> {
        rule.openids
            .clone()
            .unwrap_or_else(|| self.all_openids.clone())
    }

    /// Number of compiled rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// One line per rule, in evaluation order.
    pub fn describe(&self) -> Vec<String> {
        if self.rules.is_empty() {
            return vec!["all messages -> all recipients".to_string()];
        }
        self.rules.iter().map(CompiledRule::describe).collect()
    }
}
