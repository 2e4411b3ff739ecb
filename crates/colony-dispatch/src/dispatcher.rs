use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::endpoint::{Endpoint, EndpointError};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_CACHE_CAPACITY: usize = 256;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// One outbound operation to race across candidate endpoints.
#[derive(Debug, Clone)]
pub struct DispatchTask {
    pub method: String,
    pub params: Value,
    pub attempt_timeout: Duration,
    /// Overall bound on the whole race. The per-attempt timeout already
    /// bounds each leg; this caps the total including scheduling.
    pub deadline: Duration,
}

impl DispatchTask {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            deadline: Duration::from_secs(30),
        }
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSuccess {
    pub result: Value,
    pub endpoint: String,
    pub latency: Duration,
    pub from_cache: bool,
}

#[derive(Debug, Clone)]
pub enum DispatchError {
    /// Every candidate failed (or was skipped). `cooldown` is set when no
    /// attempt was even made because all endpoints were cooling down.
    AllEndpointsFailed {
        cooldown: bool,
        errors: Vec<(String, String)>,
    },
    DeadlineExceeded,
    Cancelled,
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::AllEndpointsFailed { cooldown, errors } => {
                if *cooldown {
                    write!(f, "all endpoints in cooldown")
                } else {
                    write!(f, "all {} endpoints failed", errors.len())
                }
            }
            DispatchError::DeadlineExceeded => write!(f, "dispatch deadline exceeded"),
            DispatchError::Cancelled => write!(f, "dispatch cancelled"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Fan-out-fastest dispatcher. Owns the endpoint set, the shared result
/// cache, and per-endpoint cooldown/latency book-keeping.
#[derive(Clone)]
pub struct Dispatcher {
    endpoints: Vec<Arc<dyn Endpoint>>,
    cache: Arc<Mutex<TtlCache>>,
    cooldowns: Arc<Mutex<HashMap<String, Instant>>>,
    latencies: Arc<Mutex<HashMap<String, Duration>>>,
    default_cooldown: Duration,
}

impl Dispatcher {
    pub fn new(endpoints: Vec<Arc<dyn Endpoint>>, cache_ttl: Duration) -> Self {
        Self {
            endpoints,
            cache: Arc::new(Mutex::new(TtlCache::new(cache_ttl, DEFAULT_CACHE_CAPACITY))),
            cooldowns: Arc::new(Mutex::new(HashMap::new())),
            latencies: Arc::new(Mutex::new(HashMap::new())),
            default_cooldown: DEFAULT_COOLDOWN,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.default_cooldown = cooldown;
        self
    }

    /// Race the task across all healthy endpoints; first non-error response
    /// wins and cancels the rest.
    pub async fn dispatch(
        &self,
        task: DispatchTask,
        cancel: &CancellationToken,
    ) -> Result<DispatchSuccess, DispatchError> {
        let key = TtlCache::key(&task.method, &task.params);
        if let Some(value) = self.cache.lock().get(&key) {
            debug!(method = %task.method, "dispatch served from cache");
            return Ok(DispatchSuccess {
                result: value,
                endpoint: "cache".to_string(),
                latency: Duration::ZERO,
                from_cache: true,
            });
        }

        let now = Instant::now();
        let healthy: Vec<Arc<dyn Endpoint>> = {
            let cooldowns = self.cooldowns.lock();
            self.endpoints
                .iter()
                .filter(|ep| {
                    cooldowns
                        .get(ep.name())
                        .map(|until| *until <= now)
                        .unwrap_or(true)
                })
                .cloned()
                .collect()
        };
        if healthy.is_empty() {
            let errors = self
                .endpoints
                .iter()
                .map(|ep| (ep.name().to_string(), "cooldown".to_string()))
                .collect();
            return Err(DispatchError::AllEndpointsFailed {
                cooldown: true,
                errors,
            });
        }

        let race = self.race(&task, healthy, cancel);
        match tokio::time::timeout(task.deadline, race).await {
            Ok(Ok(success)) => {
                self.cache.lock().put(key, success.result.clone());
                Ok(success)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(DispatchError::DeadlineExceeded),
        }
    }

    async fn race(
        &self,
        task: &DispatchTask,
        endpoints: Vec<Arc<dyn Endpoint>>,
        cancel: &CancellationToken,
    ) -> Result<DispatchSuccess, DispatchError> {
        let mut set: JoinSet<(String, Duration, Result<Value, EndpointError>)> = JoinSet::new();
        for ep in endpoints {
            let method = task.method.clone();
            let params = task.params.clone();
            let attempt_timeout = task.attempt_timeout;
            set.spawn(async move {
                let started = Instant::now();
                let outcome = match tokio::time::timeout(attempt_timeout, ep.call(&method, &params))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(EndpointError::Transport(format!(
                        "attempt timed out after {}ms",
                        attempt_timeout.as_millis()
                    ))),
                };
                (ep.name().to_string(), started.elapsed(), outcome)
            });
        }

        let mut errors = Vec::new();
        loop {
            let joined = tokio::select! {
                _ = cancel.cancelled() => {
                    set.abort_all();
                    return Err(DispatchError::Cancelled);
                }
                joined = set.join_next() => joined,
            };
            let Some(joined) = joined else {
                return Err(DispatchError::AllEndpointsFailed {
                    cooldown: false,
                    errors,
                });
            };
            match joined {
                Ok((endpoint, latency, Ok(result))) => {
                    // Winner: remaining attempts are abandoned, their errors
                    // no longer matter.
                    set.abort_all();
                    self.latencies.lock().insert(endpoint.clone(), latency);
                    debug!(%endpoint, latency_ms = latency.as_millis() as u64, "dispatch winner");
                    return Ok(DispatchSuccess {
                        result,
                        endpoint,
                        latency,
                        from_cache: false,
                    });
                }
                Ok((endpoint, _, Err(err))) => {
                    if let EndpointError::RateLimited { retry_after } = &err {
                        let until =
                            Instant::now() + retry_after.unwrap_or(self.default_cooldown);
                        self.cooldowns.lock().insert(endpoint.clone(), until);
                        warn!(%endpoint, "endpoint rate limited, cooling down");
                    }
                    errors.push((endpoint, err.to_string()));
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    errors.push(("task".to_string(), join_err.to_string()));
                }
            }
        }
    }

    /// Endpoints ordered fastest-first by last observed winning latency.
    /// Diagnostics only: the race itself always covers every healthy
    /// endpoint.
    pub fn ranked_endpoints(&self) -> Vec<(String, Option<Duration>)> {
        let latencies = self.latencies.lock();
        let mut ranked: Vec<(String, Option<Duration>)> = self
            .endpoints
            .iter()
            .map(|ep| (ep.name().to_string(), latencies.get(ep.name()).copied()))
            .collect();
        ranked.sort_by_key(|(_, latency)| latency.unwrap_or(Duration::MAX));
        ranked
    }

    /// Endpoints currently skipped for rate-limit cooldown.
    pub fn cooling_down(&self) -> Vec<String> {
        let now = Instant::now();
        self.cooldowns
            .lock()
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeEndpoint {
        name: String,
        delay: Duration,
        response: Result<Value, EndpointError>,
        calls: Arc<AtomicU32>,
    }

    impl FakeEndpoint {
        fn ok(name: &str, delay_ms: u64, value: Value) -> (Arc<Self>, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (
                Arc::new(Self {
                    name: name.to_string(),
                    delay: Duration::from_millis(delay_ms),
                    response: Ok(value),
                    calls: calls.clone(),
                }),
                calls,
            )
        }

        fn failing(name: &str, delay_ms: u64, err: EndpointError) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                delay: Duration::from_millis(delay_ms),
                response: Err(err),
                calls: Arc::new(AtomicU32::new(0)),
            })
        }
    }

    #[async_trait]
    impl Endpoint for FakeEndpoint {
        fn name(&self) -> &str {
            &self.name
        }

        async fn call(&self, _method: &str, _params: &Value) -> Result<Value, EndpointError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.response.clone()
        }
    }

    fn task() -> DispatchTask {
        DispatchTask::new("starknet_blockNumber", json!([]))
            .attempt_timeout(Duration::from_millis(200))
            .deadline(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn fastest_endpoint_wins_and_result_is_cached() {
        let (slow, _) = FakeEndpoint::ok("slow", 150, json!("0xslow"));
        let (fast, _) = FakeEndpoint::ok("fast", 10, json!("0xfast"));
        let dead = FakeEndpoint::failing(
            "dead",
            500,
            EndpointError::Transport("unreachable".to_string()),
        );
        let dispatcher = Dispatcher::new(vec![slow, fast, dead], DEFAULT_CACHE_TTL);

        let cancel = CancellationToken::new();
        let success = dispatcher.dispatch(task(), &cancel).await.unwrap();
        assert_eq!(success.endpoint, "fast");
        assert_eq!(success.result, json!("0xfast"));
        assert!(!success.from_cache);
        assert_eq!(dispatcher.cache_len(), 1);

        // Second call is served from cache without a race.
        let again = dispatcher.dispatch(task(), &cancel).await.unwrap();
        assert!(again.from_cache);
        assert_eq!(again.result, json!("0xfast"));
    }

    #[tokio::test]
    async fn all_failures_surface_per_endpoint_errors() {
        let a = FakeEndpoint::failing("a", 5, EndpointError::Transport("boom".to_string()));
        let b = FakeEndpoint::failing(
            "b",
            5,
            EndpointError::Status {
                code: 500,
                detail: "oops".to_string(),
            },
        );
        let dispatcher = Dispatcher::new(vec![a, b], DEFAULT_CACHE_TTL);
        let err = dispatcher
            .dispatch(task(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            DispatchError::AllEndpointsFailed { cooldown, errors } => {
                assert!(!cooldown);
                assert_eq!(errors.len(), 2);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn rate_limited_endpoint_enters_cooldown() {
        let limited = FakeEndpoint::failing(
            "limited",
            5,
            EndpointError::RateLimited {
                retry_after: Some(Duration::from_secs(120)),
            },
        );
        let (healthy, healthy_calls) = FakeEndpoint::ok("healthy", 20, json!(7));
        let dispatcher = Dispatcher::new(vec![limited, healthy], DEFAULT_CACHE_TTL);

        let success = dispatcher
            .dispatch(task(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(success.endpoint, "healthy");
        assert_eq!(dispatcher.cooling_down(), vec!["limited".to_string()]);
        assert_eq!(healthy_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_cooldown_fails_without_network_calls() {
        let (ep, calls) = FakeEndpoint::ok("only", 5, json!(1));
        let dispatcher =
            Dispatcher::new(vec![ep], DEFAULT_CACHE_TTL).with_cooldown(Duration::from_secs(60));
        dispatcher
            .cooldowns
            .lock()
            .insert("only".to_string(), Instant::now() + Duration::from_secs(60));

        let err = dispatcher
            .dispatch(task(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            DispatchError::AllEndpointsFailed { cooldown, .. } => assert!(cooldown),
            other => panic!("unexpected: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_aborts_the_race() {
        let (slow, _) = FakeEndpoint::ok("slow", 500, json!(1));
        let dispatcher = Dispatcher::new(vec![slow], DEFAULT_CACHE_TTL);
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            child.cancel();
        });
        let err = dispatcher.dispatch(task(), &cancel).await.unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled));
    }

    #[tokio::test]
    async fn winner_latency_feeds_ranking() {
        let (fast, _) = FakeEndpoint::ok("fast", 5, json!(1));
        let (slow, _) = FakeEndpoint::ok("slow", 100, json!(2));
        let dispatcher = Dispatcher::new(vec![slow, fast], DEFAULT_CACHE_TTL);
        dispatcher
            .dispatch(task(), &CancellationToken::new())
            .await
            .unwrap();
        let ranked = dispatcher.ranked_endpoints();
        assert_eq!(ranked[0].0, "fast");
        assert!(ranked[0].1.is_some());
        // The loser never recorded a winning latency.
        assert!(ranked[1].1.is_none());
    }
}
