//! Data provider registry.
//!
//! Conditions never talk to providers directly: the evaluator asks the
//! registry to resolve the keys a condition declares and the payloads are
//! cached on the [`VisitorInfo`] for the rest of the visit.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::visitor::VisitorInfo;

/// Device detection payload: `{is_bot, device: {type}, os: {name}, client: {name}}`.
pub const DEVICE_PROVIDER: &str = "device";
/// Behavioral counters supplied by the caller, e.g. `{visit_count: 3}`.
pub const BEHAVIOR_PROVIDER: &str = "behavior";

/// Supplies one keyed payload per visit. Returning `None` means the
/// provider has nothing for this visit, which is not an error.
pub trait DataProvider: Send + Sync {
    fn key(&self) -> &str;
    fn fetch(&self, visitor: &VisitorInfo) -> Option<Value>;
}

#[derive(Default, Clone)]
pub struct DataProviderRegistry {
    providers: HashMap<String, Arc<dyn DataProvider>>,
}

impl DataProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled device and behavior providers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(UserAgentDeviceProvider));
        registry.register(Arc::new(RequestAttributesProvider::new(BEHAVIOR_PROVIDER)));
        registry
    }

    /// Register a provider, replacing any previous one with the same key.
    pub fn register(&mut self, provider: Arc<dyn DataProvider>) {
        self.providers.insert(provider.key().to_string(), provider);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn DataProvider>> {
        self.providers.get(key).cloned()
    }

    /// Registered provider keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.providers.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Fetch every key not yet cached on the visitor. Unregistered keys are
    /// cached as absent so they are not looked up again during the visit.
    pub fn resolve<'a, I>(&self, keys: I, visitor: &mut VisitorInfo)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for key in keys {
            if visitor.is_resolved(key) {
                continue;
            }
            let payload = match self.providers.get(key) {
                Some(provider) => provider.fetch(visitor),
                None => {
                    debug!(key = key, "No data provider registered");
                    None
                }
            };
            visitor.cache_provider_data(key, payload);
        }
    }
}

/// Returns the same payload for every visit.
pub struct StaticProvider {
    key: String,
    payload: Option<Value>,
}

impl StaticProvider {
    pub fn new(key: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }
}

impl DataProvider for StaticProvider {
    fn key(&self) -> &str {
        &self.key
    }

    fn fetch(&self, _visitor: &VisitorInfo) -> Option<Value> {
        self.payload.clone()
    }
}

/// Exposes the request's free-form attributes under a provider key.
pub struct RequestAttributesProvider {
    key: String,
}

impl RequestAttributesProvider {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl DataProvider for RequestAttributesProvider {
    fn key(&self) -> &str {
        &self.key
    }

    fn fetch(&self, visitor: &VisitorInfo) -> Option<Value> {
        let attributes = &visitor.request().attributes;
        if attributes.is_empty() {
            return None;
        }
        Some(Value::Object(attributes.clone()))
    }
}

const BOT_MARKERS: &[&str] = &[
    "bot", "crawler", "spider", "slurp", "headless", "curl/", "wget/",
];

/// Coarse user-agent classifier. Good enough for tests and the batch
/// driver; production deployments register a real device detector under
/// [`DEVICE_PROVIDER`].
pub struct UserAgentDeviceProvider;

impl UserAgentDeviceProvider {
    fn classify(ua: &str) -> Value {
        let ua = ua.to_ascii_lowercase();
        let is_bot = BOT_MARKERS.iter().any(|marker| ua.contains(marker));

        let device_type = if ua.contains("ipad")
            || ua.contains("tablet")
            || (ua.contains("android") && !ua.contains("mobile"))
        {
            "tablet"
        } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
            "mobile"
        } else {
            "desktop"
        };

        let os = if ua.contains("iphone") || ua.contains("ipad") {
            Some("ios")
        } else if ua.contains("android") {
            Some("android")
        } else if ua.contains("windows") {
            Some("windows")
        } else if ua.contains("mac os x") || ua.contains("macintosh") {
            Some("macos")
        } else if ua.contains("linux") {
            Some("linux")
        } else {
            None
        };

        let client = if ua.contains("edg/") {
            Some("edge")
        } else if ua.contains("opr/") {
            Some("opera")
        } else if ua.contains("chrome/") || ua.contains("crios/") {
            Some("chrome")
        } else if ua.contains("firefox/") || ua.contains("fxios/") {
            Some("firefox")
        } else if ua.contains("safari/") {
            Some("safari")
        } else {
            None
        };

        json!({
            "is_bot": is_bot,
            "device": { "type": device_type },
            "os": { "name": os },
            "client": { "name": client },
        })
    }
}

impl DataProvider for UserAgentDeviceProvider {
    fn key(&self) -> &str {
        DEVICE_PROVIDER
    }

    fn fetch(&self, visitor: &VisitorInfo) -> Option<Value> {
        let ua = visitor.request().user_agent.as_deref()?.trim();
        if ua.is_empty() {
            return None;
        }
        Some(Self::classify(ua))
    }
}
