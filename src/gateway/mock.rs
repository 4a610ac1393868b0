//! In-process gateway for tests and local development
//!
//! Keeps customers, stored cards and charges in memory. Charges honour the
//! idempotency key the way the real gateway does: a repeated key with the
//! same parameters returns the first response, error or not, and a repeated
//! key with different parameters is refused.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

use super::{
    Charge, ChargeRequest, CustomerProfile, GatewayCredentials, GatewayError, NewCustomer,
    PaymentGateway, StoredCard,
};

#[derive(Debug, Default)]
struct MockState {
    /// Card details behind each client-side token
    tokens: HashMap<String, (String, u32, u32)>,
    declined_tokens: HashSet<String>,
    /// customer id -> cards
    customers: HashMap<String, Vec<StoredCard>>,
    profiles: HashMap<String, CustomerProfile>,
    declined_sources: HashSet<String>,
    /// First request and response per idempotency key. A repeated key with
    /// the same parameters replays the response; different parameters are
    /// refused with a 400, as the real gateway does.
    charges_by_key: HashMap<String, (ChargeRequest, Result<Charge, GatewayError>)>,
    /// Every charge request received, including replays
    charge_requests: Vec<ChargeRequest>,
    /// Errors returned (and not remembered) by the next charge calls
    charge_failures: VecDeque<GatewayError>,
    /// Charges that go through but whose response is replaced by a timeout
    lost_responses: u32,
    next_id: u64,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{}", prefix, self.next_id)
    }

    fn card_for_token(&mut self, token: &str) -> StoredCard {
        let (last4, exp_month, exp_year) = self
            .tokens
            .get(token)
            .cloned()
            .unwrap_or_else(|| ("4242".to_string(), 12, 2030));
        let id = self.next_id("card");
        if self.declined_tokens.contains(token) {
            self.declined_sources.insert(id.clone());
        }
        StoredCard {
            id,
            last4,
            exp_month,
            exp_year,
        }
    }
}

/// [`PaymentGateway`] kept in memory
#[derive(Debug, Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Describe the card behind `token`. Unregistered tokens are a 4242 card.
    pub fn register_token(&self, token: &str, last4: &str, exp_month: u32, exp_year: u32) {
        self.state
            .lock()
            .tokens
            .insert(token.to_string(), (last4.to_string(), exp_month, exp_year));
    }

    /// Charges against cards created from `token` are declined with a 402.
    pub fn decline_token(&self, token: &str) {
        self.state.lock().declined_tokens.insert(token.to_string());
    }

    /// Seed an existing customer with one card, returning the card's source id.
    pub fn add_customer(&self, customer_id: &str, token: &str) -> String {
        let mut state = self.state.lock();
        let card = state.card_for_token(token);
        let source_id = card.id.clone();
        state
            .customers
            .entry(customer_id.to_string())
            .or_default()
            .push(card);
        source_id
    }

    /// Forget a customer, so listing its cards returns 404.
    pub fn remove_customer(&self, customer_id: &str) {
        self.state.lock().customers.remove(customer_id);
    }

    /// The next charge calls fail with these errors, in order.
    pub fn fail_next_charges(&self, errors: impl IntoIterator<Item = GatewayError>) {
        self.state.lock().charge_failures.extend(errors);
    }

    /// The next `count` charge responses, replays included, are lost and the
    /// caller sees a timeout. The charge itself is still made.
    pub fn lose_next_responses(&self, count: u32) {
        self.state.lock().lost_responses = count;
    }

    /// Charges that actually succeeded, one per idempotency key
    pub fn successful_charges(&self) -> usize {
        self.state
            .lock()
            .charges_by_key
            .values()
            .filter(|(_, r)| r.is_ok())
            .count()
    }

    pub fn charge_requests(&self) -> Vec<ChargeRequest> {
        self.state.lock().charge_requests.clone()
    }

    pub fn customer_cards(&self, customer_id: &str) -> Vec<StoredCard> {
        self.state
            .lock()
            .customers
            .get(customer_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn customer_count(&self) -> usize {
        self.state.lock().customers.len()
    }

    pub fn customer_profile(&self, customer_id: &str) -> Option<CustomerProfile> {
        self.state.lock().profiles.get(customer_id).cloned()
    }
}

fn not_found(path: String) -> GatewayError {
    GatewayError::Status { status: 404, path }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn list_payment_methods(
        &self,
        _creds: &GatewayCredentials,
        customer_id: &str,
    ) -> Result<Vec<StoredCard>, GatewayError> {
        self.state
            .lock()
            .customers
            .get(customer_id)
            .cloned()
            .ok_or_else(|| not_found(format!("customers/{}/sources", customer_id)))
    }

    async fn attach_payment_method(
        &self,
        _creds: &GatewayCredentials,
        customer_id: &str,
        token: &str,
    ) -> Result<String, GatewayError> {
        let mut state = self.state.lock();
        if !state.customers.contains_key(customer_id) {
            return Err(not_found(format!("customers/{}/sources", customer_id)));
        }
        let card = state.card_for_token(token);
        let source_id = card.id.clone();
        state
            .customers
            .entry(customer_id.to_string())
            .or_default()
            .push(card);
        Ok(source_id)
    }

    async fn create_customer(
        &self,
        _creds: &GatewayCredentials,
        token: &str,
        profile: &CustomerProfile,
    ) -> Result<NewCustomer, GatewayError> {
        let mut state = self.state.lock();
        let customer_id = state.next_id("cus");
        let card = state.card_for_token(token);
        let source_id = card.id.clone();
        state.customers.insert(customer_id.clone(), vec![card]);
        state.profiles.insert(customer_id.clone(), profile.clone());
        Ok(NewCustomer {
            customer_id,
            source_id,
        })
    }

    async fn create_charge(
        &self,
        _creds: &GatewayCredentials,
        request: &ChargeRequest,
    ) -> Result<Charge, GatewayError> {
        let mut state = self.state.lock();
        state.charge_requests.push(request.clone());

        let key = request.idempotency_key.as_str().to_string();
        let existing = state.charges_by_key.get(&key).cloned();
        let result = match existing {
            Some((first, _)) if first != *request => {
                return Err(GatewayError::Status {
                    status: 400,
                    path: "charges".to_string(),
                });
            }
            Some((_, previous)) => previous,
            None => {
                if let Some(error) = state.charge_failures.pop_front() {
                    return Err(error);
                }
                let result = if state.declined_sources.contains(&request.source_id) {
                    Err(GatewayError::Status {
                        status: 402,
                        path: "charges".to_string(),
                    })
                } else {
                    Ok(Charge {
                        id: state.next_id("ch"),
                    })
                };
                state
                    .charges_by_key
                    .insert(key, (request.clone(), result.clone()));
                result
            }
        };

        if state.lost_responses > 0 {
            state.lost_responses -= 1;
            return Err(GatewayError::Timeout {
                path: "charges".to_string(),
            });
        }
        result
    }
}
