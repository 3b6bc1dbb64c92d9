//! Versioned rule-set snapshots with copy-on-write reload.
//!
//! A reload compiles a brand new [`RuleSet`] and swaps the current pointer.
//! Scans hold an `Arc<RuleSet>` for their whole run, so an older snapshot
//! stays valid until the last scan using it finishes.

use super::rules::{builtin_rules, CategoryToggles, CustomPattern, DetectionRule, PatternError};
use super::Category;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Immutable, versioned collection of enabled rules
#[derive(Debug, Default)]
pub struct RuleSet {
    version: u64,
    rules: Vec<DetectionRule>,
}

impl RuleSet {
    /// Build a snapshot from candidate rules, keeping only the enabled ones
    pub fn from_rules(version: u64, rules: Vec<DetectionRule>) -> Self {
        Self {
            version,
            rules: rules.into_iter().filter(|r| r.is_enabled()).collect(),
        }
    }

    /// Compile built-ins and custom patterns into a snapshot.
    ///
    /// Custom patterns that fail validation are left out and reported; they
    /// never prevent the rest of the set from loading.
    pub fn load(
        version: u64,
        toggles: &CategoryToggles,
        custom_patterns: &BTreeMap<String, String>,
    ) -> (Self, Vec<RejectedPattern>) {
        let mut rules = builtin_rules(toggles);
        let mut rejected = Vec::new();

        for (name, source) in custom_patterns {
            match CustomPattern::new(name.as_str(), source.as_str()).compile() {
                Ok(rule) => rules.push(rule),
                Err(error) => {
                    warn!(pattern = %name, error = %error, "Rejected custom pattern");
                    rejected.push(RejectedPattern {
                        name: name.clone(),
                        error,
                    });
                }
            }
        }

        (Self::from_rules(version, rules), rejected)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn rules(&self) -> &[DetectionRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether any enabled rule reports `category`
    pub fn covers(&self, category: &Category) -> bool {
        self.rules.iter().any(|r| r.category() == category)
    }
}

/// A custom pattern left out of a snapshot
#[derive(Debug)]
pub struct RejectedPattern {
    pub name: String,
    pub error: PatternError,
}

/// Outcome of a load or reload
#[derive(Debug)]
pub struct LoadReport {
    pub snapshot: Arc<RuleSet>,
    pub rejected: Vec<RejectedPattern>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// A rule set published together with the settings that accompany it
#[derive(Debug, Default)]
pub struct Snapshot<S = ()> {
    pub rules: Arc<RuleSet>,
    pub settings: S,
}

/// Holder of the current snapshot.
///
/// `S` is whatever must change atomically with the rules; readers load the
/// pair in one step and never see the rules of one reload with the settings
/// of another.
pub struct PatternRegistry<S = ()> {
    current: ArcSwap<Snapshot<S>>,
    version: AtomicU64,
    reload_lock: Mutex<()>,
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternRegistry {
    /// Create a registry holding an empty snapshot (version 0)
    pub fn new() -> Self {
        Self::with_settings(())
    }
}

impl<S> PatternRegistry<S> {
    /// Create a registry holding an empty rule set (version 0) and `settings`
    pub fn with_settings(settings: S) -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot {
                rules: Arc::new(RuleSet::default()),
                settings,
            }),
            version: AtomicU64::new(0),
            reload_lock: Mutex::new(()),
        }
    }

    /// Current rule set. Callers keep it for the duration of a scan.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.current.load().rules)
    }

    /// Current rule set and settings
    pub fn current(&self) -> Arc<Snapshot<S>> {
        self.current.load_full()
    }

    /// Version of the current snapshot
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Compile a new rule set and publish it with `settings`.
    ///
    /// Never blocks scans; reloads are serialized among themselves so versions
    /// become current in increasing order.
    pub fn reload_with(
        &self,
        settings: S,
        toggles: &CategoryToggles,
        custom_patterns: &BTreeMap<String, String>,
    ) -> LoadReport {
        self.publish(|_| settings, toggles, custom_patterns)
    }

    fn publish(
        &self,
        settings: impl FnOnce(&S) -> S,
        toggles: &CategoryToggles,
        custom_patterns: &BTreeMap<String, String>,
    ) -> LoadReport {
        let _guard = self.reload_lock.lock();
        let version = self.version.load(Ordering::Acquire) + 1;
        let settings = settings(&self.current.load().settings);

        let (rule_set, rejected) = RuleSet::load(version, toggles, custom_patterns);
        let snapshot = Arc::new(rule_set);

        self.current.store(Arc::new(Snapshot {
            rules: Arc::clone(&snapshot),
            settings,
        }));
        self.version.store(version, Ordering::Release);

        info!(
            version = version,
            rules = snapshot.len(),
            rejected = rejected.len(),
            "Rule set loaded"
        );

        LoadReport { snapshot, rejected }
    }
}

impl<S: Clone> PatternRegistry<S> {
    /// Compile a new rule set, keeping the current settings
    pub fn reload(
        &self,
        toggles: &CategoryToggles,
        custom_patterns: &BTreeMap<String, String>,
    ) -> LoadReport {
        self.publish(S::clone, toggles, custom_patterns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_new_registry_is_empty() {
        let registry = PatternRegistry::new();
        assert_eq!(registry.version(), 0);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_reload_increments_version() {
        let registry = PatternRegistry::new();
        let first = registry.reload(&CategoryToggles::all(), &BTreeMap::new());
        let second = registry.reload(&CategoryToggles::all(), &BTreeMap::new());
        assert_eq!(first.snapshot.version(), 1);
        assert_eq!(second.snapshot.version(), 2);
        assert_eq!(registry.version(), 2);
        assert_eq!(registry.snapshot().version(), 2);
    }

    #[test]
    fn test_old_snapshot_survives_reload() {
        let registry = PatternRegistry::new();
        registry.reload(&CategoryToggles::all(), &BTreeMap::new());
        let held = registry.snapshot();
        let before = held.len();

        registry.reload(&CategoryToggles::none(), &BTreeMap::new());

        assert_eq!(held.version(), 1);
        assert_eq!(held.len(), before);
        assert!(held.covers(&Category::Ssn));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_disabled_families_not_in_snapshot() {
        let toggles = CategoryToggles {
            credentials: false,
            ..CategoryToggles::all()
        };
        let registry = PatternRegistry::new();
        let report = registry.reload(&toggles, &BTreeMap::new());
        assert!(!report.snapshot.covers(&Category::ApiKey));
        assert!(!report.snapshot.covers(&Category::PrivateKeyBlock));
        assert!(report.snapshot.covers(&Category::Ssn));
    }

    #[test]
    fn test_invalid_custom_pattern_rejected_individually() {
        let registry = PatternRegistry::new();
        let report = registry.reload(
            &CategoryToggles::none(),
            &custom(&[("good", r"EMP-\d{6}"), ("bad", "(unclosed")]),
        );

        assert!(!report.is_clean());
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].name, "bad");
        assert_eq!(report.snapshot.len(), 1);
        assert!(report
            .snapshot
            .covers(&Category::Custom(Arc::from("good"))));
    }

    #[test]
    fn test_settings_published_with_rules() {
        let registry = PatternRegistry::with_settings("initial");
        registry.reload(&CategoryToggles::all(), &BTreeMap::new());
        assert_eq!(registry.current().settings, "initial");

        registry.reload_with("strict", &CategoryToggles::none(), &BTreeMap::new());
        let current = registry.current();
        assert_eq!(current.settings, "strict");
        assert_eq!(current.rules.version(), 2);
        assert!(current.rules.is_empty());
    }
}
