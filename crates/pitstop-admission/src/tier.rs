//! Quota tiers: which counters a request is charged against, in what order.
//!
//! Counter keys follow `rate_limit:<scope>:<dimension>:<identity>:<hour>`.
//! Caller-supplied segments (user ids, API keys, IPv6 addresses) are escaped
//! so that a segment can never contain the `:` separator; distinct
//! (scope, identity, window) triples therefore always render distinct keys.

use std::borrow::Cow;

use crate::config::{AdmissionConfig, TierPolicy};
use crate::controller::RequestIdentity;
use crate::window::Window;

const KEY_PREFIX: &str = "rate_limit";

/// Namespace a tier's counters live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Public routes, e.g. login and docs.
    Public,
    /// Everything that is not public.
    Auth,
    /// Nested inside the caller's API key.
    ApiKey,
}

/// What a tier counts per.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    User,
    Ip,
    /// Every caller of the scope's API key together.
    Global,
}

impl Dimension {
    fn segment(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ip => "ip",
            Self::Global => "global",
        }
    }

    fn identity(self, identity: &RequestIdentity) -> Option<String> {
        match self {
            Self::User => identity.user_id.clone().filter(|u| !u.is_empty()),
            Self::Ip => identity.address.map(|a| a.to_string()),
            Self::Global => Some("all".to_string()),
        }
    }
}

/// One quota rule evaluated against a request.
///
/// `counter_key` is empty when the tier does not apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaTier {
    pub applies: bool,
    pub counter_key: String,
    pub ceiling: u64,
    pub label: &'static str,
}

/// Static description of a tier, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierRule {
    pub scope: Scope,
    pub dimension: Dimension,
    pub ceiling: u64,
    pub label: &'static str,
}

impl TierRule {
    const fn new(scope: Scope, dimension: Dimension, ceiling: u64, label: &'static str) -> Self {
        Self {
            scope,
            dimension,
            ceiling,
            label,
        }
    }

    /// Builds this rule's tier for one request in one window.
    pub fn build(&self, identity: &RequestIdentity, window: &Window) -> QuotaTier {
        let scope = match self.scope {
            Scope::Public => Some(Cow::Borrowed("public")),
            Scope::Auth => Some(Cow::Borrowed("auth")),
            Scope::ApiKey => identity
                .api_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .map(|k| Cow::Owned(format!("key:{}", escape_segment(k)))),
        };

        let counter_key = match (scope, self.dimension.identity(identity)) {
            (Some(scope), Some(id)) => Some(counter_key(&scope, self.dimension, &id, window)),
            _ => None,
        };

        QuotaTier {
            applies: counter_key.is_some(),
            counter_key: counter_key.unwrap_or_default(),
            ceiling: self.ceiling,
            label: self.label,
        }
    }
}

/// Renders one counter key. `scope` is used as given; `identity` is escaped.
pub fn counter_key(scope: &str, dimension: Dimension, identity: &str, window: &Window) -> String {
    format!(
        "{KEY_PREFIX}:{scope}:{}:{}:{}",
        dimension.segment(),
        escape_segment(identity),
        window.key_segment()
    )
}

/// Percent-escapes `%` and `:` so a segment cannot forge a separator.
pub fn escape_segment(segment: &str) -> Cow<'_, str> {
    if !segment.contains(['%', ':']) {
        return Cow::Borrowed(segment);
    }
    let mut out = String::with_capacity(segment.len() + 8);
    for ch in segment.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

/// Tier rules per route class, derived once from the configuration.
#[derive(Debug, Clone)]
pub struct TierTable {
    public: Vec<TierRule>,
    routes: Vec<TierRule>,
}

impl TierTable {
    pub fn from_config(config: &AdmissionConfig) -> Self {
        let public = vec![TierRule::new(
            Scope::Public,
            Dimension::Ip,
            config.public_ceiling,
            "public route rate limit by IP",
        )];

        // Priority order: the most specific quota is checked first.
        let routes = match config.policy {
            TierPolicy::Standard => vec![
                TierRule::new(
                    Scope::Auth,
                    Dimension::User,
                    config.user_ceiling,
                    "authenticated rate limit by user",
                ),
                TierRule::new(
                    Scope::Auth,
                    Dimension::Ip,
                    config.address_ceiling,
                    "authenticated rate limit by IP",
                ),
            ],
            TierPolicy::ApiKeyScoped => vec![
                TierRule::new(
                    Scope::ApiKey,
                    Dimension::User,
                    config.key_user_ceiling,
                    "api key rate limit by user",
                ),
                TierRule::new(
                    Scope::ApiKey,
                    Dimension::Ip,
                    config.key_address_ceiling,
                    "api key rate limit by IP",
                ),
                TierRule::new(
                    Scope::ApiKey,
                    Dimension::Global,
                    config.key_ceiling,
                    "api key rate limit",
                ),
            ],
        };

        Self { public, routes }
    }

    pub fn rules(&self, public: bool) -> &[TierRule] {
        if public { &self.public } else { &self.routes }
    }

    /// Builds the ordered tier list for one request.
    pub fn resolve(
        &self,
        identity: &RequestIdentity,
        public: bool,
        window: &Window,
    ) -> Vec<QuotaTier> {
        self.rules(public)
            .iter()
            .map(|rule| rule.build(identity, window))
            .collect()
    }
}

/// Resolves the ordered tier list for `identity` under `config`.
#[cfg(test)]
fn resolve_tiers(
    config: &AdmissionConfig,
    identity: &RequestIdentity,
    window: &Window,
) -> Vec<QuotaTier> {
    TierTable::from_config(config).resolve(identity, config.is_public(&identity.path), window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn window() -> Window {
        Window::containing(Utc.with_ymd_and_hms(2026, 10, 16, 14, 5, 0).unwrap())
    }

    fn identity(path: &str) -> RequestIdentity {
        RequestIdentity {
            path: path.to_string(),
            address: Some("203.0.113.7".parse().unwrap()),
            ..RequestIdentity::default()
        }
    }

    #[test]
    fn public_route_gets_single_ip_tier() {
        let config = AdmissionConfig::default();
        let tiers = resolve_tiers(&config, &identity("/api/v1/auth/refresh"), &window());
        assert_eq!(tiers.len(), 1);
        assert!(tiers[0].applies);
        assert_eq!(
            tiers[0].counter_key,
            "rate_limit:public:ip:203.0.113.7:2026-10-16-14"
        );
        assert_eq!(tiers[0].ceiling, 10_000);
    }

    #[test]
    fn authenticated_route_orders_user_before_ip() {
        let config = AdmissionConfig::default();
        let mut id = identity("/api/v1/posts");
        id.user_id = Some("u-42".to_string());

        let tiers = resolve_tiers(&config, &id, &window());
        assert_eq!(tiers.len(), 2);
        assert_eq!(
            tiers[0].counter_key,
            "rate_limit:auth:user:u-42:2026-10-16-14"
        );
        assert_eq!(tiers[0].label, "authenticated rate limit by user");
        assert_eq!(
            tiers[1].counter_key,
            "rate_limit:auth:ip:203.0.113.7:2026-10-16-14"
        );
        assert!(tiers[0].ceiling < tiers[1].ceiling);
    }

    #[test]
    fn user_tier_skipped_without_user() {
        let config = AdmissionConfig::default();
        let tiers = resolve_tiers(&config, &identity("/api/v1/posts"), &window());
        assert!(!tiers[0].applies);
        assert!(tiers[0].counter_key.is_empty());
        assert!(tiers[1].applies);
    }

    #[test]
    fn api_key_tiers_nest_inside_key() {
        let config = AdmissionConfig {
            policy: TierPolicy::ApiKeyScoped,
            ..AdmissionConfig::default()
        };
        let mut id = identity("/api/v1/questions");
        id.user_id = Some("u-1".to_string());
        id.api_key = Some("k-abc".to_string());

        let keys: Vec<_> = resolve_tiers(&config, &id, &window())
            .into_iter()
            .map(|t| (t.counter_key, t.ceiling))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("rate_limit:key:k-abc:user:u-1:2026-10-16-14".to_string(), 500),
                (
                    "rate_limit:key:k-abc:ip:203.0.113.7:2026-10-16-14".to_string(),
                    1_000
                ),
                ("rate_limit:key:k-abc:global:all:2026-10-16-14".to_string(), 5_000),
            ]
        );
    }

    #[test]
    fn separators_in_identities_cannot_collide() {
        let config = AdmissionConfig {
            policy: TierPolicy::ApiKeyScoped,
            ..AdmissionConfig::default()
        };
        let w = window();

        // key "k:user:u" + ip tier vs key "k" + user "u:ip:203.0.113.7"
        let mut a = identity("/x");
        a.api_key = Some("k:user:u".to_string());
        let mut b = identity("/x");
        b.api_key = Some("k".to_string());
        b.user_id = Some("u:ip:203.0.113.7".to_string());

        let keys_a: Vec<_> = resolve_tiers(&config, &a, &w)
            .into_iter()
            .filter(|t| t.applies)
            .map(|t| t.counter_key)
            .collect();
        let keys_b: Vec<_> = resolve_tiers(&config, &b, &w)
            .into_iter()
            .filter(|t| t.applies)
            .map(|t| t.counter_key)
            .collect();
        for k in &keys_a {
            assert!(!keys_b.contains(k), "collision on {k}");
        }
    }

    #[test]
    fn ipv6_address_is_escaped() {
        let config = AdmissionConfig::default();
        let mut id = identity("/health");
        id.address = Some("2001:db8::1".parse().unwrap());
        let tiers = resolve_tiers(&config, &id, &window());
        assert_eq!(
            tiers[0].counter_key,
            "rate_limit:public:ip:2001%3Adb8%3A%3A1:2026-10-16-14"
        );
    }

    #[test]
    fn escape_leaves_plain_segments_alone() {
        assert!(matches!(escape_segment("u-42"), Cow::Borrowed("u-42")));
        assert_eq!(escape_segment("50%:x"), "50%25%3Ax");
    }

    #[test]
    fn new_hour_new_key() {
        let config = AdmissionConfig::default();
        let id = identity("/api/v1/posts");
        let w = window();
        let now = resolve_tiers(&config, &id, &w);
        let later = resolve_tiers(&config, &id, &w.next());
        assert_ne!(now[1].counter_key, later[1].counter_key);
        assert!(later[1].counter_key.ends_with(":2026-10-16-15"));
    }
}
