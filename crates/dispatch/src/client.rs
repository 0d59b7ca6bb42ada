//! Transport contracts and the persistent per-endpoint client pools.
//!
//! Contract:
//! - one client per `(host, query_service_port)` key, created lazily on
//!   first use and kept for the dispatcher's lifetime;
//! - concurrent `get_or_create` calls with the same key observe at most one
//!   construction;
//! - `shutdown_all` visits every cached client exactly once and clears the
//!   pool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use msq_common::deadline::Deadline;
use msq_common::error::Result;
use msq_common::ids::RequestId;
use msq_planner::routing::ServerInstance;

use crate::request::{
    ExplainResponse, QueryRequest, QueryResponse, TimeSeriesQueryRequest, TimeSeriesResponse,
};

/// Client-side contract of the worker query service.
///
/// Implementations must be safe to use concurrently from multiple in-flight
/// requests.
#[async_trait]
pub trait DispatchTransport: Send + Sync {
    /// Submit a stage-plan bundle for execution.
    async fn submit(&self, request: QueryRequest, deadline: Deadline) -> Result<QueryResponse>;

    /// Collect per-server serialized plan trees without executing.
    async fn explain(
        &self,
        request: QueryRequest,
        deadline: Deadline,
    ) -> Result<Vec<ExplainResponse>>;

    /// Fire-and-forget cancel of one request on this server.
    async fn cancel(&self, request_id: RequestId) -> Result<()>;

    /// Initiate orderly shutdown of the underlying channel.
    fn shutdown(&self) {}
}

/// Client-side contract of the worker time-series service.
#[async_trait]
pub trait TimeSeriesTransport: Send + Sync {
    /// Submit a time-series plan and wait for its single response.
    async fn submit(
        &self,
        request: TimeSeriesQueryRequest,
        deadline: Deadline,
    ) -> Result<TimeSeriesResponse>;

    /// Initiate orderly shutdown of the underlying channel.
    fn shutdown(&self) {}
}

/// Lazily builds transports for endpoints as the pools first see them.
pub trait TransportFactory: Send + Sync {
    /// Build a query-service client for `hostname:port`.
    fn create_dispatch_transport(
        &self,
        hostname: &str,
        port: u16,
    ) -> Result<Arc<dyn DispatchTransport>>;

    /// Build a time-series client for `hostname:port`.
    fn create_time_series_transport(
        &self,
        hostname: &str,
        port: u16,
    ) -> Result<Arc<dyn TimeSeriesTransport>>;
}

/// Per-server response as it lands on the fan-out callback queue.
#[derive(Debug)]
pub struct AsyncDispatchResponse<E> {
    /// Server the response (or failure) came from.
    pub server: ServerInstance,
    /// The response, or the failure that stands in for it.
    pub result: Result<E>,
}

/// Persistent client pool keyed by [`ServerInstance::dispatch_key`].
pub struct ClientPool<C: ?Sized> {
    clients: Mutex<HashMap<String, Arc<C>>>,
}

impl<C: ?Sized> ClientPool<C> {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Client bound to the server's dispatch key, building it if absent.
    ///
    /// The pool lock is held across construction, so two racing calls with
    /// the same key construct once and share the instance.
    pub fn get_or_create(
        &self,
        server: &ServerInstance,
        create: impl FnOnce(&str, u16) -> Result<Arc<C>>,
    ) -> Result<Arc<C>> {
        let key = server.dispatch_key();
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&key) {
            return Ok(Arc::clone(client));
        }
        let client = create(&server.hostname, server.query_service_port)?;
        clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    /// Initiate orderly shutdown on every cached client and clear the pool.
    pub fn shutdown_all(&self, shutdown: impl Fn(&Arc<C>)) {
        for (_, client) in self.clients.lock().drain() {
            shutdown(&client);
        }
    }

    /// Number of cached clients.
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: ?Sized> Default for ClientPool<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingClient;

    #[tokio::test]
    async fn constructs_at_most_once_per_key() {
        let pool: Arc<ClientPool<CountingClient>> = Arc::new(ClientPool::new());
        let constructions = Arc::new(AtomicUsize::new(0));
        let server = ServerInstance::new("host-1", 8442, 8421);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = Arc::clone(&pool);
            let constructions = Arc::clone(&constructions);
            let server = server.clone();
            handles.push(tokio::spawn(async move {
                pool.get_or_create(&server, |_, _| {
                    constructions.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(CountingClient))
                })
                .unwrap()
            }));
        }
        let clients: Vec<_> = futures_join(handles).await;

        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len(), 1);
        for window in clients.windows(2) {
            assert!(Arc::ptr_eq(&window[0], &window[1]));
        }
    }

    #[tokio::test]
    async fn mailbox_port_does_not_split_clients() {
        let pool: ClientPool<CountingClient> = ClientPool::new();
        let a = ServerInstance::new("host-1", 8442, 8421);
        let b = ServerInstance::new("host-1", 8442, 9421);

        let first = pool.get_or_create(&a, |_, _| Ok(Arc::new(CountingClient))).unwrap();
        let second = pool.get_or_create(&b, |_, _| Ok(Arc::new(CountingClient))).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn shutdown_all_visits_each_client_and_clears_the_pool() {
        let pool: ClientPool<CountingClient> = ClientPool::new();
        let server = ServerInstance::new("host-1", 8442, 8421);
        pool.get_or_create(&server, |_, _| Ok(Arc::new(CountingClient)))
            .unwrap();

        let shutdowns = AtomicUsize::new(0);
        pool.shutdown_all(|_| {
            shutdowns.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert!(pool.is_empty());
    }

    async fn futures_join<T>(handles: Vec<tokio::task::JoinHandle<T>>) -> Vec<T> {
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.await.unwrap());
        }
        out
    }
}
