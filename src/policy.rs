//! Session policy: what to filter, how strictly, and where not to
//!
//! A policy is a read-only snapshot for the lifetime of one pipeline run.
//! Changing it restarts the pipeline; cached verdicts survive because the
//! fingerprint covers every parameter sent to the backend.

use crate::error::{Result, ShieldError};
use crate::settings::SettingsStore;
use crate::types::{ContentKind, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use url::Url;

/// Settings-store key the policy is persisted under
pub const POLICY_KEY: &str = "shield.policy";

/// Category labels the backend is known to emit
pub const KNOWN_CATEGORIES: &[&str] = &[
    "hate",
    "harassment",
    "violence",
    "sexual",
    "self_harm",
    "toxic",
    "severe_toxic",
    "obscene",
    "threat",
    "insult",
    "identity_hate",
    "nudity",
];

/// Filtering strictness, sent to the backend as its age-group parameter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterLevel {
    Mild,
    #[default]
    Moderate,
    Strict,
}

impl FilterLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterLevel::Mild => "mild",
            FilterLevel::Moderate => "moderate",
            FilterLevel::Strict => "strict",
        }
    }
}

/// User preference for the blocking treatment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockPreference {
    /// Pick by confidence and category severity
    #[default]
    Auto,
    Replace,
    Blur,
    Hide,
}

/// Configuration snapshot for one scanning session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionPolicy {
    /// Master switch
    pub enabled: bool,

    pub filter_level: FilterLevel,

    /// Discover and classify text fragments
    pub filter_text: bool,

    /// Discover and classify image fragments
    pub filter_images: bool,

    /// Backend threshold for text
    pub text_threshold: f64,

    /// Backend threshold for images
    pub image_threshold: f64,

    /// Category label → enabled. Labels absent from the map count as enabled.
    pub categories: BTreeMap<String, bool>,

    pub block_method: BlockPreference,

    /// Hostnames (or fragments of hostnames) exempt from scanning
    pub trusted_sites: Vec<String>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            filter_level: FilterLevel::default(),
            filter_text: true,
            filter_images: true,
            text_threshold: 0.7,
            image_threshold: 0.6,
            categories: KNOWN_CATEGORIES
                .iter()
                .map(|c| (c.to_string(), true))
                .collect(),
            block_method: BlockPreference::default(),
            trusted_sites: Vec::new(),
        }
    }
}

impl SessionPolicy {
    /// Threshold sent to the backend for the given content kind
    pub fn threshold_for(&self, kind: ContentKind) -> f64 {
        match kind {
            ContentKind::Text => self.text_threshold,
            ContentKind::Image => self.image_threshold,
        }
    }

    /// Whether fragments of this kind should be discovered at all
    pub fn filters(&self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::Text => self.filter_text,
            ContentKind::Image => self.filter_images,
        }
    }

    /// Canonical encoding of the parameters that change the backend's answer
    pub fn fingerprint_params(&self, kind: ContentKind) -> String {
        format!(
            "age_group={};threshold={:.4}",
            self.filter_level.as_str(),
            self.threshold_for(kind)
        )
    }

    /// Whether a category label is enabled for blocking
    pub fn category_enabled(&self, label: &str) -> bool {
        let label = label.to_ascii_lowercase();
        self.categories.get(&label).copied().unwrap_or(true)
    }

    /// Whether a verdict should lead to a blocking action
    ///
    /// Unsafe verdicts without labels are always actionable; labelled
    /// verdicts need at least one enabled label.
    pub fn is_actionable(&self, verdict: &Verdict) -> bool {
        if verdict.is_safe {
            return false;
        }
        verdict.categories.is_empty()
            || verdict.categories.iter().any(|c| self.category_enabled(c))
    }

    /// Whether the page at `url` is on the trusted-site allowlist
    ///
    /// Substring match of each normalized allowlist entry against the
    /// normalized page hostname.
    pub fn is_trusted(&self, url: &str) -> bool {
        let host = normalize_host(url);
        if host.is_empty() {
            return false;
        }
        self.trusted_sites
            .iter()
            .map(|site| normalize_host(site))
            .any(|site| !site.is_empty() && host.contains(&site))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("textThreshold", self.text_threshold),
            ("imageThreshold", self.image_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ShieldError::Config(format!(
                    "{} must be between 0.0 and 1.0, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Load the policy from a settings store, falling back to defaults
    pub fn load(store: &dyn SettingsStore) -> Result<Self> {
        let mut values = store.get(&[POLICY_KEY])?;
        match values.remove(POLICY_KEY) {
            Some(value) => {
                let policy: SessionPolicy = serde_json::from_value(value).map_err(|e| {
                    ShieldError::Settings(format!("Failed to parse stored policy: {}", e))
                })?;
                policy.validate()?;
                Ok(policy)
            }
            None => Ok(Self::default()),
        }
    }

    /// Persist the policy to a settings store
    pub fn save(&self, store: &dyn SettingsStore) -> Result<()> {
        self.validate()?;
        let mut partial = HashMap::new();
        partial.insert(POLICY_KEY.to_string(), serde_json::to_value(self)?);
        store.set(partial)
    }
}

/// Reduce a URL or bare hostname to a comparable hostname
///
/// Lowercases, drops scheme, port, path and a leading `www.`.
pub fn normalize_host(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let host = Url::parse(trimmed)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .or_else(|| {
            Url::parse(&format!("http://{}", trimmed))
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
        })
        .unwrap_or_else(|| trimmed.to_string());

    let host = host.to_ascii_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}
