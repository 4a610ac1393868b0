//! Stripe REST client
//!
//! Form-encoded requests with basic auth; nested metadata is flattened into
//! `metadata[key]` fields.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{
    Charge, ChargeRequest, CustomerProfile, GatewayCredentials, GatewayError, NewCustomer,
    PaymentGateway, StoredCard,
};

pub const DEFAULT_BASE_URL: &str = "https://api.stripe.com/v1/";

#[derive(Deserialize)]
struct CardList {
    data: Vec<StoredCard>,
}

#[derive(Deserialize)]
struct Source {
    id: String,
}

#[derive(Deserialize)]
struct SourceList {
    data: Vec<Source>,
}

#[derive(Deserialize)]
struct Customer {
    id: String,
    sources: SourceList,
}

fn flatten_metadata(params: &mut Vec<(String, String)>, metadata: &BTreeMap<String, String>) {
    for (key, value) in metadata {
        params.push((format!("metadata[{}]", key), value.clone()));
    }
}

/// [`PaymentGateway`] over the Stripe HTTP API
#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: Client,
    base_url: String,
}

impl StripeGateway {
    /// `base_url` must end with `/`; it is suffixed with request paths.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport {
                path: base_url.clone(),
                message: e.to_string(),
            })?;

        Ok(Self { client, base_url })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        creds: &GatewayCredentials,
        method: Method,
        path: &str,
        params: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<T, GatewayError> {
        let full_path = format!("{}{}", self.base_url, path);

        let mut builder = self
            .client
            .request(method.clone(), &full_path)
            .basic_auth(creds.secret_key(), None::<&str>);
        if let Some(key) = idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }
        if !params.is_empty() {
            builder = builder.form(params);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout {
                    path: full_path.clone(),
                }
            } else {
                GatewayError::Transport {
                    path: full_path.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(
                method = %method,
                path = %full_path,
                status = status.as_u16(),
                "Gateway returned non-success status"
            );
            return Err(GatewayError::Status {
                status: status.as_u16(),
                path: full_path,
            });
        }

        response.json::<T>().await.map_err(|e| GatewayError::Decode {
            path: full_path,
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn list_payment_methods(
        &self,
        creds: &GatewayCredentials,
        customer_id: &str,
    ) -> Result<Vec<StoredCard>, GatewayError> {
        let path = format!("customers/{}/sources?object=card", customer_id);
        let cards: CardList = self.request(creds, Method::GET, &path, &[], None).await?;
        Ok(cards.data)
    }

    async fn attach_payment_method(
        &self,
        creds: &GatewayCredentials,
        customer_id: &str,
        token: &str,
    ) -> Result<String, GatewayError> {
        let path = format!("customers/{}/sources", customer_id);
        let params = vec![("source".to_string(), token.to_string())];
        let source: Source = self.request(creds, Method::POST, &path, &params, None).await?;
        Ok(source.id)
    }

    async fn create_customer(
        &self,
        creds: &GatewayCredentials,
        token: &str,
        profile: &CustomerProfile,
    ) -> Result<NewCustomer, GatewayError> {
        let mut params = vec![
            ("source".to_string(), token.to_string()),
            ("description".to_string(), profile.description.clone()),
        ];
        if let Some(email) = &profile.email {
            params.push(("email".to_string(), email.clone()));
        }
        flatten_metadata(&mut params, &profile.metadata);

        let customer: Customer = self
            .request(creds, Method::POST, "customers", &params, None)
            .await?;

        let source_id = customer
            .sources
            .data
            .into_iter()
            .next()
            .map(|s| s.id)
            .ok_or_else(|| GatewayError::Decode {
                path: format!("{}customers", self.base_url),
                message: "customer created without a source".to_string(),
            })?;

        Ok(NewCustomer {
            customer_id: customer.id,
            source_id,
        })
    }

    async fn create_charge(
        &self,
        creds: &GatewayCredentials,
        request: &ChargeRequest,
    ) -> Result<Charge, GatewayError> {
        let mut params = vec![
            ("amount".to_string(), request.amount_cents.to_string()),
            ("currency".to_string(), request.currency.clone()),
            ("customer".to_string(), request.customer_id.clone()),
            ("source".to_string(), request.source_id.clone()),
            ("description".to_string(), request.description.clone()),
        ];
        flatten_metadata(&mut params, &request.metadata);

        self.request(
            creds,
            Method::POST,
            "charges",
            &params,
            Some(request.idempotency_key.as_str()),
        )
        .await
    }
}
