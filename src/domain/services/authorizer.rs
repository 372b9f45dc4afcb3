#[cfg(test)]
#[path = "authorizer_test.rs"]
mod tests;

use std::sync::Arc;

use chrono::DateTime;
use chrono::Duration;
use chrono::NaiveDate;
use chrono::Utc;

use super::ExchangeLog;
use super::QuotaLedger;
use super::UserDirectory;
use crate::domain::models::quota_key;
use crate::domain::models::validate_input;
use crate::domain::models::EndpointError;
use crate::domain::models::GenerationRequest;
use crate::domain::models::ModelCatalog;
use crate::domain::models::ModelInfo;
use crate::domain::models::UsageSnapshot;
use crate::domain::models::UserType;
use crate::domain::models::VerifierBox;

#[derive(Clone, Debug)]
pub struct AuthorizerSettings {
    pub legacy_checks: bool,
    pub flood_interval: Duration,
}

impl Default for AuthorizerSettings {
    fn default() -> AuthorizerSettings {
        return AuthorizerSettings {
            legacy_checks: true,
            flood_interval: Duration::seconds(30),
        };
    }
}

/// A request that passed every check, along with the quota it consumed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authorization {
    pub model: ModelInfo,
    pub usage: UsageSnapshot,
    pub quota_key: String,
    pub day: NaiveDate,
}

/// Runs the endpoint checks in a fixed order. The first failure wins and
/// nothing past it runs.
pub struct Authorizer {
    pub catalog: ModelCatalog,
    pub users: Arc<UserDirectory>,
    pub quota: Arc<QuotaLedger>,
    pub exchanges: Arc<ExchangeLog>,
    verifier: VerifierBox,
    settings: AuthorizerSettings,
}

impl Authorizer {
    pub fn new(
        catalog: ModelCatalog,
        users: Arc<UserDirectory>,
        quota: Arc<QuotaLedger>,
        exchanges: Arc<ExchangeLog>,
        verifier: VerifierBox,
        settings: AuthorizerSettings,
    ) -> Authorizer {
        return Authorizer {
            catalog,
            users,
            quota,
            exchanges,
            verifier,
            settings,
        };
    }

    pub async fn authorize(
        &self,
        request: &GenerationRequest,
    ) -> Result<Authorization, EndpointError> {
        if let Some(reason) = validate_input(&request.input_text) {
            return Err(EndpointError::InvalidInput(reason));
        }

        let model = self.catalog.resolve(&request.model_id);
        let user_type = self.users.user_type(request.identity.as_deref());
        if model.is_premium() && user_type != UserType::Premium {
            return Err(EndpointError::PremiumRequired { model_id: model.id });
        }

        self.check_token(request).await?;

        let quota_key = request.quota_key();
        let day = Utc::now().date_naive();
        let usage = self
            .quota
            .check_and_increment(&quota_key, user_type, day)
            .map_err(EndpointError::QuotaExceeded)?;

        if self.settings.legacy_checks {
            if let Err(err) = self.check_legacy(request, &quota_key) {
                self.quota.refund(&quota_key, day);
                return Err(err);
            }
        }

        tracing::debug!(
            quota_key = %quota_key,
            model = %model.id,
            used = usage.used,
            limit = usage.limit,
            "Authorized generation"
        );

        return Ok(Authorization {
            model,
            usage,
            quota_key,
            day,
        });
    }

    /// Today's usage for a caller, without reserving a request.
    pub fn usage(&self, identity: Option<&str>, client_network_address: &str) -> UsageSnapshot {
        let identity = identity.filter(|id| return !id.trim().is_empty());
        return self.quota.snapshot(
            &quota_key(identity, client_network_address),
            self.users.user_type(identity),
            Utc::now().date_naive(),
        );
    }

    /// Forgets quota counters of past days and callers without an exchange
    /// in the last day.
    pub fn prune(&self, now: DateTime<Utc>) {
        self.quota.prune(now.date_naive());
        self.exchanges.prune(now - Duration::days(1));
        tracing::debug!(
            quota_keys = self.quota.tracked_keys(),
            exchange_keys = self.exchanges.tracked_keys(),
            "Pruned caller state"
        );
    }

    async fn check_token(&self, request: &GenerationRequest) -> Result<(), EndpointError> {
        if request.verification_token.trim().is_empty() {
            return Err(EndpointError::VerificationFailed(
                "Missing verification token".to_string(),
            ));
        }

        let verified = self
            .verifier
            .verify(
                &request.verification_token,
                &request.client_network_address,
            )
            .await;

        match verified {
            Ok(true) => return Ok(()),
            Ok(false) => {
                return Err(EndpointError::VerificationFailed(
                    "Verification failed".to_string(),
                ));
            }
            Err(err) => {
                tracing::error!(error = ?err, "Verification service failed");
                return Err(EndpointError::VerificationFailed(
                    "Verification could not be completed".to_string(),
                ));
            }
        }
    }

    fn check_legacy(
        &self,
        request: &GenerationRequest,
        quota_key: &str,
    ) -> Result<(), EndpointError> {
        if let Some(identity) = &request.identity {
            if !self.users.exists(identity) {
                return Err(EndpointError::AuthRequired);
            }
        }

        if let Some(last) = self.exchanges.last_recorded_at(quota_key) {
            let elapsed = Utc::now() - last;
            if elapsed < self.settings.flood_interval {
                let wait = (self.settings.flood_interval - elapsed).num_seconds().max(1);
                return Err(EndpointError::FloodControl(format!(
                    "Too many requests, wait {wait} seconds before sending another one."
                )));
            }
        }

        return Ok(());
    }
}
