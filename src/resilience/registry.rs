//! Caller-owned set of circuit breakers, one per downstream dependency.

use super::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

type StateChangeObserver = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Lazily creates and hands out one [`CircuitBreaker`] per dependency name.
///
/// Construct one and inject it where it is needed; there is no global instance.
pub struct BreakerRegistry {
    template: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    observer: Option<StateChangeObserver>,
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("template", &self.template)
            .field("dependencies", &self.dependencies())
            .finish()
    }
}

impl BreakerRegistry {
    pub fn new(template: CircuitBreakerConfig) -> Self {
        Self {
            template,
            breakers: Mutex::new(HashMap::new()),
            observer: None,
        }
    }

    /// Observer attached to every breaker created from now on, receiving the dependency name.
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn template(&self) -> &CircuitBreakerConfig {
        &self.template
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, dependency: &str) -> Option<Arc<CircuitBreaker>> {
        self.map().get(dependency).cloned()
    }

    pub fn get_or_create(&self, dependency: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(dependency, || self.template.clone())
    }

    /// Like [`get_or_create`](Self::get_or_create), with a dependency-specific config
    /// used only if the breaker does not exist yet.
    pub fn get_or_create_with<F>(&self, dependency: &str, config: F) -> Arc<CircuitBreaker>
    where
        F: FnOnce() -> CircuitBreakerConfig,
    {
        let mut map = self.map();
        if let Some(existing) = map.get(dependency) {
            return Arc::clone(existing);
        }
        let breaker = Arc::new(CircuitBreaker::new(dependency, config()));
        if let Some(observer) = &self.observer {
            let observer = Arc::clone(observer);
            let name = dependency.to_string();
            breaker.set_on_state_change(move |from, to| observer(&name, from, to));
        }
        map.insert(dependency.to_string(), Arc::clone(&breaker));
        breaker
    }

    pub fn dependencies(&self) -> Vec<String> {
        let mut names: Vec<String> = self.map().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn reset_all(&self) {
        for breaker in self.map().values() {
            breaker.reset();
        }
    }

    /// Snapshots sorted by dependency name.
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snaps: Vec<CircuitBreakerSnapshot> =
            self.map().values().map(|b| b.snapshot()).collect();
        snaps.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snaps
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_same_name_same_breaker() {
        let registry = BreakerRegistry::default();
        let a = registry.get_or_create("kibana");
        let b = registry.get_or_create("kibana");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.get("helm").is_none());
    }

    #[test]
    fn test_breakers_are_isolated() {
        let registry =
            BreakerRegistry::new(CircuitBreakerConfig::new().with_failure_threshold(1));
        let kibana = registry.get_or_create("kibana");
        let helm = registry.get_or_create("helm");
        kibana.record_failure();
        assert_eq!(kibana.state(), CircuitState::Open);
        assert_eq!(helm.state(), CircuitState::Closed);

        registry.reset_all();
        assert_eq!(kibana.state(), CircuitState::Closed);
    }

    #[test]
    fn test_custom_config_only_on_creation() {
        let registry = BreakerRegistry::default();
        let custom = registry.get_or_create_with("grafana", || {
            CircuitBreakerConfig::new().with_open_timeout(Duration::from_secs(5))
        });
        assert_eq!(custom.config().open_timeout, Duration::from_secs(5));
        let again = registry.get_or_create_with("grafana", CircuitBreakerConfig::default);
        assert_eq!(again.config().open_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_observer_receives_dependency_name() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let registry = BreakerRegistry::new(CircuitBreakerConfig::new().with_failure_threshold(1))
            .with_observer(move |dep, _from, to| sink.lock().unwrap().push((dep.to_string(), to)));

        registry.get_or_create("prometheus").record_failure();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("prometheus".to_string(), CircuitState::Open)]
        );
    }

    #[test]
    fn test_snapshots_sorted() {
        let registry = BreakerRegistry::default();
        registry.get_or_create("loki");
        registry.get_or_create("argocd");
        let names: Vec<String> = registry
            .snapshots()
            .into_iter()
            .map(|s| s.dependency)
            .collect();
        assert_eq!(names, vec!["argocd", "loki"]);
        assert_eq!(registry.dependencies(), vec!["argocd", "loki"]);
    }
}
