//! Client for the upstream customer/order API.
//!
//! All requests share one `reqwest::Client` with a timeout and user agent.
//! The customer directory changes rarely and is cached for a configurable
//! time; orders and components are always fetched fresh.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::SourceConfig;
use crate::model::{Customer, Order, StackBox};

pub type CustomerDirectory = BTreeMap<u64, Customer>;

/// Errors raised while talking to the upstream API.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Upstream resource not found: {url}")]
    NotFound { url: String },
    #[error("Upstream answered {status} for {url}")]
    UnexpectedStatus { status: StatusCode, url: String },
    #[error("Customer {0} not found")]
    CustomerNotFound(u64),
    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(String),
}

fn user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    format!("order-stacker/{version} ({os}; {arch})")
}

struct CachedCustomers {
    fetched_at: Instant,
    customers: Arc<CustomerDirectory>,
}

fn is_fresh(fetched_at: Instant, ttl: Duration, now: Instant) -> bool {
    !ttl.is_zero() && now.saturating_duration_since(fetched_at) < ttl
}

/// Source of customers, orders and order components.
pub struct OrderSource {
    client: reqwest::Client,
    config: SourceConfig,
    customers: RwLock<Option<CachedCustomers>>,
}

impl OrderSource {
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(user_agent())
            .build()?;

        Ok(Self::with_client(client, config))
    }

    pub(crate) fn with_client(client: reqwest::Client, config: SourceConfig) -> Self {
        Self {
            client,
            config,
            customers: RwLock::new(None),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, SourceError> {
        let url = self
            .config
            .endpoint(segments)
            .map_err(SourceError::InvalidUrl)?;
        debug!(%url, "requesting upstream resource");

        let mut request = self.client.get(url.clone());
        if let Some(credentials) = self.config.credentials() {
            request = request.basic_auth(&credentials.user, credentials.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound { url: url.into() });
        }
        if !status.is_success() {
            warn!(%url, %status, "upstream answered with an error status");
            return Err(SourceError::UnexpectedStatus {
                status,
                url: url.into(),
            });
        }

        Ok(response.json::<T>().await?)
    }

    /// All customers keyed by id, served from cache while fresh.
    pub async fn customers(&self) -> Result<Arc<CustomerDirectory>, SourceError> {
        let ttl = self.config.customer_cache_ttl();

        {
            let cached = self.customers.read().await;
            if let Some(entry) = cached.as_ref() {
                if is_fresh(entry.fetched_at, ttl, Instant::now()) {
                    return Ok(Arc::clone(&entry.customers));
                }
            }
        }

        let mut cached = self.customers.write().await;
        // Another request may have refreshed the cache while we waited.
        if let Some(entry) = cached.as_ref() {
            if is_fresh(entry.fetched_at, ttl, Instant::now()) {
                return Ok(Arc::clone(&entry.customers));
            }
        }

        let list: Vec<Customer> = self.get_json(&["customers"]).await?;
        let customers: Arc<CustomerDirectory> = Arc::new(
            list.into_iter()
                .map(|customer| (customer.id, customer))
                .collect(),
        );
        info!("👥 Loaded {} customers from upstream", customers.len());

        if !ttl.is_zero() {
            *cached = Some(CachedCustomers {
                fetched_at: Instant::now(),
                customers: Arc::clone(&customers),
            });
        }

        Ok(customers)
    }

    /// A single customer from the (cached) directory.
    pub async fn customer(&self, customer_no: u64) -> Result<Customer, SourceError> {
        self.customers()
            .await?
            .get(&customer_no)
            .cloned()
            .ok_or(SourceError::CustomerNotFound(customer_no))
    }

    /// Orders placed by a customer.
    pub async fn customer_orders(&self, customer_no: u64) -> Result<Vec<Order>, SourceError> {
        let customer_no = customer_no.to_string();
        self.get_json(&["customer_orders", customer_no.as_str()]).await
    }

    /// Components (boxes) of an order.
    ///
    /// The order number is sent as a single encoded path segment.
    pub async fn order_components(&self, order_no: &str) -> Result<Vec<StackBox>, SourceError> {
        self.get_json(&["order_components", order_no]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use crate::test_support::{Upstream, local_source, source, spawn_upstream};

    #[test]
    fn freshness_respects_ttl() {
        let start = Instant::now();
        let ttl = Duration::from_secs(60);
        assert!(is_fresh(start, ttl, start + Duration::from_secs(59)));
        assert!(!is_fresh(start, ttl, start + Duration::from_secs(60)));
        assert!(!is_fresh(start, Duration::ZERO, start));
    }

    #[test]
    fn user_agent_names_the_service() {
        assert!(user_agent().starts_with("order-stacker/"));
    }

    #[test]
    fn client_builds_from_config() {
        let config = SourceConfig::new(
            "http://localhost:1",
            None,
            Duration::from_secs(1),
            Duration::ZERO,
        );
        assert!(OrderSource::new(config).is_ok());
    }

    #[tokio::test]
    async fn customers_are_fetched_with_basic_auth_and_cached() {
        let upstream = Upstream::default();
        let calls = Arc::clone(&upstream.customer_calls);
        let source = source(spawn_upstream(upstream).await, Duration::from_secs(3600));

        let first = source.customers().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(
            first.get(&2u64).and_then(|c| c.details.get("name")),
            Some(&json!("Globex"))
        );

        let customer = source.customer(1).await.unwrap();
        assert_eq!(customer.id, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_ttl_disables_customer_cache() {
        let upstream = Upstream::default();
        let calls = Arc::clone(&upstream.customer_calls);
        let source = source(spawn_upstream(upstream).await, Duration::ZERO);

        source.customers().await.unwrap();
        source.customers().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_customer_is_reported() {
        let source = source(spawn_upstream(Upstream::default()).await, Duration::ZERO);
        assert!(matches!(
            source.customer(99).await,
            Err(SourceError::CustomerNotFound(99))
        ));
    }

    #[tokio::test]
    async fn missing_credentials_surface_as_unexpected_status() {
        let base_url = spawn_upstream(Upstream::default()).await;
        let source = local_source(SourceConfig::new(
            base_url,
            None,
            Duration::from_secs(5),
            Duration::ZERO,
        ));

        assert!(matches!(
            source.customers().await,
            Err(SourceError::UnexpectedStatus {
                status: StatusCode::UNAUTHORIZED,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn order_components_deserialize_into_boxes() {
        let source = source(spawn_upstream(Upstream::default()).await, Duration::ZERO);

        let components = source.order_components("A-1").await.unwrap();
        assert_eq!(components.len(), 2);
        assert_eq!(components[1].weight, 8.0);
        assert_eq!(components[1].capacity, 1.0);
        assert_eq!(components[1].payload.get("id"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn malformed_components_fail_fast() {
        let source = source(spawn_upstream(Upstream::default()).await, Duration::ZERO);
        assert!(matches!(
            source.order_components("broken").await,
            Err(SourceError::Http(_))
        ));
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let source = source(spawn_upstream(Upstream::default()).await, Duration::ZERO);
        assert!(matches!(
            source.order_components("nope").await,
            Err(SourceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn order_number_stays_in_its_path_segment() {
        let upstream = Upstream::default();
        let calls = Arc::clone(&upstream.customer_calls);
        let source = source(spawn_upstream(upstream).await, Duration::ZERO);

        for order_no in ["../customers", "..", "%2E%2E/customers"] {
            assert!(
                matches!(
                    source.order_components(order_no).await,
                    Err(SourceError::NotFound { .. })
                ),
                "order number {order_no:?} reached another resource"
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn order_number_cannot_add_query_or_fragment() {
        let source = source(spawn_upstream(Upstream::default()).await, Duration::ZERO);

        for order_no in ["A-1?page=2", "A-1#top"] {
            match source.order_components(order_no).await {
                Err(SourceError::NotFound { url }) => {
                    assert!(url.contains("/order_components/A-1%"), "unexpected url {url}");
                }
                other => panic!("expected NotFound for {order_no:?}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn invalid_base_url_is_reported() {
        let source = local_source(SourceConfig::new(
            "not a url",
            None,
            Duration::from_secs(1),
            Duration::ZERO,
        ));
        assert!(matches!(
            source.customers().await,
            Err(SourceError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn upstream_failure_is_unexpected_status() {
        let source = source(spawn_upstream(Upstream::default()).await, Duration::ZERO);

        let orders = source.customer_orders(7).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].get("customer"), Some(&json!(7)));

        assert!(matches!(
            source.customer_orders(500).await,
            Err(SourceError::UnexpectedStatus {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                ..
            })
        ));
    }
}
