//! Pipeline configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use crate::error::{Result, ShieldError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level shield configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShieldConfig {
    pub cache: CacheConfig,
    pub scanner: ScannerConfig,
    pub dispatch: DispatchConfig,
    pub gateway: GatewayConfig,
    pub events: EventsConfig,
}

impl ShieldConfig {
    /// Parse a JSON config string
    pub fn from_json(content: &str) -> Result<Self> {
        let config: ShieldConfig = serde_json::from_str(content)
            .map_err(|e| ShieldError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ShieldError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(ShieldError::Config("cache.maxEntries must be > 0".into()));
        }
        if self.scanner.min_text_length > self.scanner.max_text_length {
            return Err(ShieldError::Config(format!(
                "scanner.minTextLength ({}) exceeds maxTextLength ({})",
                self.scanner.min_text_length, self.scanner.max_text_length
            )));
        }
        if self.dispatch.batch_size == 0 {
            return Err(ShieldError::Config("dispatch.batchSize must be > 0".into()));
        }
        if self.events.capacity == 0 {
            return Err(ShieldError::Config("events.capacity must be > 0".into()));
        }
        if self.scanner.rescan_interval_ms == 0 || self.dispatch.drain_interval_ms == 0 {
            return Err(ShieldError::Config(
                "scanner.rescanIntervalMs and dispatch.drainIntervalMs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Result cache bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Maximum number of cached verdicts
    pub max_entries: usize,

    /// Verdict lifetime in seconds
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            ttl_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Fragment discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScannerConfig {
    /// Minimum text length in characters (inclusive)
    pub min_text_length: usize,

    /// Maximum text length in characters (inclusive)
    pub max_text_length: usize,

    pub min_image_width: u32,

    pub min_image_height: u32,

    /// Safety-net full rescan interval
    pub rescan_interval_ms: u64,

    /// Block-level and inline containers whose own text is a candidate
    pub text_tags: Vec<String>,

    /// Image node tags
    pub image_tags: Vec<String>,

    /// Sub-trees never descended into
    pub ignored_tags: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        let tags = |list: &[&str]| list.iter().map(|t| t.to_string()).collect::<Vec<_>>();
        Self {
            min_text_length: 5,
            max_text_length: 5000,
            min_image_width: 50,
            min_image_height: 50,
            rescan_interval_ms: 5000,
            text_tags: tags(&[
                // block-level
                "p", "div", "article", "section", "li", "h1", "h2", "h3", "h4", "h5", "h6",
                "blockquote", "td", "th", "figcaption", "pre",
                // inline
                "span", "a", "strong", "em", "b", "i", "label",
            ]),
            image_tags: tags(&["img"]),
            ignored_tags: tags(&[
                "script", "style", "noscript", "meta", "link", "head", "title", "template",
            ]),
        }
    }
}

impl ScannerConfig {
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }

    pub fn is_text_tag(&self, tag: &str) -> bool {
        self.text_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    pub fn is_image_tag(&self, tag: &str) -> bool {
        self.image_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    pub fn is_ignored_tag(&self, tag: &str) -> bool {
        self.ignored_tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Queue draining rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchConfig {
    /// Fragments dequeued per drain tick
    pub batch_size: usize,

    /// Pause between drain ticks
    pub drain_interval_ms: u64,

    /// Send each tick's fragments as one gateway batch call
    pub batch_requests: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            drain_interval_ms: 100,
            batch_requests: false,
        }
    }
}

impl DispatchConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }
}

/// HTTP classification backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub base_url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Event broadcast channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventsConfig {
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}
