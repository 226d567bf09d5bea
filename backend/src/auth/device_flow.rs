// backend/src/auth/device_flow.rs

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::auth::provider::{OAuthProviderDyn, TokenExchange};
use crate::clock::ClockDyn;
use crate::error::AuthError;
use crate::jwt::TokenSigner;
use crate::models::{DeviceAuthSession, DeviceAuthStatus, DeviceFlowResponse, PollStatus, User};
use crate::store::{AuthStoreDyn, StoreError};

/// Result of a single poll. `Pending` is normal progress, not a failure.
#[derive(Debug)]
pub enum PollOutcome {
    /// Not approved yet; poll again after `interval` seconds (longer if `slow_down`).
    Pending { slow_down: bool, interval: u64, expires_in: u64 },
    Authorized { user: User, token: String },
    /// The provider refused the grant. Terminal: start a new flow.
    Denied { reason: String },
    /// The session ran past its deadline. Terminal: start a new flow.
    Expired,
}

impl PollOutcome {
    pub fn status(&self) -> PollStatus {
        match self {
            Self::Pending { .. } => PollStatus::Pending,
            Self::Authorized { .. } => PollStatus::Authorized,
            Self::Denied { .. } => PollStatus::Denied,
            Self::Expired => PollStatus::Expired,
        }
    }

    /// Folds the non-authorized outcomes into the error taxonomy.
    pub fn into_result(self) -> Result<(User, String), AuthError> {
        match self {
            Self::Authorized { user, token } => Ok((user, token)),
            Self::Pending { .. } => Err(AuthError::AuthorizationPending),
            Self::Denied { reason } => Err(AuthError::TokenExchangeFailed(reason)),
            Self::Expired => Err(AuthError::SessionExpired),
        }
    }
}

/// Drives the device authorization grant from start to token issuance.
#[derive(Clone, Debug)]
pub struct DeviceFlowService {
    store: AuthStoreDyn,
    provider: OAuthProviderDyn,
    signer: TokenSigner,
    clock: ClockDyn,
}

impl DeviceFlowService {
    pub fn new(store: AuthStoreDyn, provider: OAuthProviderDyn, signer: TokenSigner, clock: ClockDyn) -> Self {
        Self { store, provider, signer, clock }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub async fn start_flow(&self) -> Result<DeviceFlowResponse, AuthError> {
        let start = self.provider.request_device_code().await.map_err(|e| {
            warn!("device code request to '{}' failed: {:#}", self.provider.id(), e);
            AuthError::ProviderUnavailable(e)
        })?;

        let session = DeviceAuthSession::pending(&start, self.clock.now()).map_err(|e| {
            warn!("'{}' returned an unusable device code: {}", self.provider.id(), e);
            AuthError::ProviderUnavailable(e.into())
        })?;
        self.store.create_session(&session).await?;

        info!(
            "device flow started via {} (expires in {}s)",
            self.provider.id(),
            start.expires_in
        );
        Ok(start)
    }

    pub async fn poll_flow(&self, device_code: &str) -> Result<PollOutcome, AuthError> {
        let mut session = match self.store.get_session_by_device_code(device_code).await {
            Ok(session) => session,
            Err(StoreError::NotFound) => return Err(AuthError::SessionNotFound),
            Err(e) => return Err(e.into()),
        };

        let now = self.clock.now();
        if session.is_past_deadline(now) {
            // Authorized stays authorized; only a pending session is moved.
            if session.status() == DeviceAuthStatus::Pending {
                session.expire()?;
                self.store.update_session(&session).await?;
                info!("device session expired before approval");
            }
            return Ok(PollOutcome::Expired);
        }

        match session.status() {
            DeviceAuthStatus::Expired => return Ok(PollOutcome::Expired),
            DeviceAuthStatus::Authorized => return self.reissue(&session).await,
            DeviceAuthStatus::Pending => {}
        }

        let exchange = self.provider.exchange_device_code(device_code).await.map_err(|e| {
            warn!("token exchange with '{}' failed: {:#}", self.provider.id(), e);
            AuthError::ProviderUnavailable(e)
        })?;

        let pending = |slow_down| PollOutcome::Pending {
            slow_down,
            interval: session.interval,
            expires_in: session.expires_in(now),
        };

        match exchange {
            TokenExchange::Pending => Ok(pending(false)),
            TokenExchange::SlowDown => {
                debug!("provider asked the client to slow down");
                Ok(pending(true))
            }
            TokenExchange::Rejected { error } => {
                info!("device flow rejected by provider: {}", error);
                Ok(PollOutcome::Denied { reason: error })
            }
            TokenExchange::Granted { access_token } => {
                let identity = self.provider.fetch_identity(&access_token).await.map_err(|e| {
                    warn!("identity lookup with '{}' failed: {:#}", self.provider.id(), e);
                    AuthError::ProviderUnavailable(e)
                })?;

                self.commit_authorization(device_code.to_string(), identity.subject_id).await
            }
        }
    }

    // Polling an authorized session never reaches the provider.
    async fn reissue(&self, session: &DeviceAuthSession) -> Result<PollOutcome, AuthError> {
        let Some(user_id) = session.user_id() else {
            return Err(AuthError::Internal(anyhow!("authorized session without a user")));
        };

        let user = match self.store.get_user(user_id).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                return Ok(PollOutcome::Denied { reason: "account no longer exists".into() });
            }
            Err(e) => return Err(e.into()),
        };

        let token = self.signer.issue(&user.id)?;
        Ok(PollOutcome::Authorized { user, token })
    }

    /// Links the session to a local user. Runs on its own task so a caller that
    /// goes away mid-commit cannot leave a user without an authorized session.
    async fn commit_authorization(&self, device_code: String, subject_id: String) -> Result<PollOutcome, AuthError> {
        let this = self.clone();
        tokio::spawn(async move { this.authorize_session(&device_code, &subject_id).await })
            .await
            .map_err(|e| AuthError::Internal(anyhow!("authorization commit did not finish: {}", e)))?
    }

    async fn authorize_session(&self, device_code: &str, subject_id: &str) -> Result<PollOutcome, AuthError> {
        // Re-read so an expiry or a concurrent commit applied while we were
        // talking to the provider wins.
        let mut session = self.store.get_session_by_device_code(device_code).await?;
        match session.status() {
            DeviceAuthStatus::Expired => return Ok(PollOutcome::Expired),
            DeviceAuthStatus::Authorized => return self.reissue(&session).await,
            DeviceAuthStatus::Pending => {}
        }

        let user = self.resolve_user(subject_id).await?;
        session.authorize(&user.id)?;
        self.store.update_session(&session).await?;
        info!("device session authorized for user {}", user.id);

        let token = self.signer.issue(&user.id)?;
        Ok(PollOutcome::Authorized { user, token })
    }

    /// Get-or-create keyed on the provider subject. A concurrent creator for
    /// the same subject surfaces as `Conflict`, in which case its row is used.
    async fn resolve_user(&self, subject_id: &str) -> Result<User, AuthError> {
        match self.store.get_user_by_external_id(subject_id).await {
            Ok(mut user) => {
                user.is_active = true;
                self.store.update_user(&user).await?;
                return Ok(user);
            }
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        let user = User::new(subject_id, self.clock.now());
        match self.store.create_user(&user).await {
            Ok(()) => {
                info!("created user {}", user.id);
                Ok(user)
            }
            Err(StoreError::Conflict(_)) => {
                debug!("user already created by a concurrent login");
                Ok(self.store.get_user_by_external_id(subject_id).await?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use async_trait::async_trait;
    use chrono::Utc;

    use crate::auth::provider::{OAuthProvider, ProviderIdentity};
    use crate::clock::ManualClock;
    use crate::store::{AuthStore, MemoryStore};

    #[derive(Debug, Default)]
    struct ScriptedProvider {
        exchanges: Mutex<VecDeque<TokenExchange>>,
        exchange_calls: AtomicUsize,
        fail_start: AtomicBool,
        slow_identity: AtomicBool,
        subject: Mutex<String>,
    }

    impl ScriptedProvider {
        fn new(subject: &str) -> Arc<Self> {
            let p = Self::default();
            *p.subject.lock().unwrap() = subject.into();
            Arc::new(p)
        }

        fn push(&self, outcome: TokenExchange) {
            self.exchanges.lock().unwrap().push_back(outcome);
        }

        fn grant(&self) {
            self.push(TokenExchange::Granted { access_token: "provider-token".into() });
        }

        fn calls(&self) -> usize {
            self.exchange_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OAuthProvider for ScriptedProvider {
        fn id(&self) -> &'static str {
            "scripted"
        }

        async fn request_device_code(&self) -> anyhow::Result<DeviceFlowResponse> {
            anyhow::ensure!(!self.fail_start.load(Ordering::SeqCst), "provider down");
            Ok(DeviceFlowResponse {
                device_code: "ABCD-1234".into(),
                user_code: "WXYZ-5678".into(),
                verification_uri: "https://example.test/device".into(),
                expires_in: 600,
                interval: 5,
            })
        }

        async fn exchange_device_code(&self, _device_code: &str) -> anyhow::Result<TokenExchange> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);
            self.exchanges
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow!("no scripted response left"))
        }

        async fn fetch_identity(&self, access_token: &str) -> anyhow::Result<ProviderIdentity> {
            anyhow::ensure!(access_token == "provider-token", "bad access token");
            if self.slow_identity.load(Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
            Ok(ProviderIdentity {
                subject_id: self.subject.lock().unwrap().clone(),
                email: Some("someone@example.com".into()),
                name: Some("Some One".into()),
            })
        }
    }

    struct Harness {
        service: DeviceFlowService,
        store: Arc<MemoryStore>,
        provider: Arc<ScriptedProvider>,
        clock: ManualClock,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let provider = ScriptedProvider::new("google-42");
        let clock = ManualClock::new(Utc::now());
        let signer = TokenSigner::new(b"device-flow-test", Arc::new(clock.clone()));
        let service = DeviceFlowService::new(
            store.clone(),
            provider.clone(),
            signer,
            Arc::new(clock.clone()),
        );
        Harness { service, store, provider, clock }
    }

    #[tokio::test]
    async fn end_to_end_scenario() {
        let h = harness();

        let start = h.service.start_flow().await.unwrap();
        assert_eq!(start.device_code, "ABCD-1234");
        assert_eq!(start.user_code, "WXYZ-5678");
        let session = h.store.get_session_by_device_code("ABCD-1234").await.unwrap();
        assert_eq!(session.status(), DeviceAuthStatus::Pending);

        h.provider.push(TokenExchange::Pending);
        let outcome = h.service.poll_flow("ABCD-1234").await.unwrap();
        assert!(matches!(
            outcome,
            PollOutcome::Pending { slow_down: false, interval: 5, expires_in: 600 }
        ));
        assert!(matches!(outcome.into_result(), Err(AuthError::AuthorizationPending)));

        h.clock.advance(chrono::Duration::seconds(30));
        h.provider.grant();
        let PollOutcome::Authorized { user, token } = h.service.poll_flow("ABCD-1234").await.unwrap() else {
            panic!("expected authorization");
        };
        assert_ne!(user.id, "google-42");
        assert_eq!(user.external_id, "google-42");
        assert_eq!(h.service.signer().validate(&token).unwrap(), user.id);

        let session = h.store.get_session_by_device_code("ABCD-1234").await.unwrap();
        assert_eq!(session.status(), DeviceAuthStatus::Authorized);
        assert_eq!(session.user_id(), Some(user.id.as_str()));

        let calls_before = h.provider.calls();
        let (again, second_token) = h.service.poll_flow("ABCD-1234").await.unwrap().into_result().unwrap();
        assert_eq!(again.id, user.id);
        assert_eq!(h.service.signer().validate(&second_token).unwrap(), user.id);
        assert_eq!(h.provider.calls(), calls_before);

        h.clock.advance(chrono::Duration::seconds(571));
        let outcome = h.service.poll_flow("ABCD-1234").await.unwrap();
        assert!(matches!(outcome, PollOutcome::Expired));
        assert_eq!(h.provider.calls(), calls_before);
    }

    #[tokio::test]
    async fn expiry_wins_over_a_grant() {
        let h = harness();
        h.service.start_flow().await.unwrap();
        h.provider.grant();

        h.clock.advance(chrono::Duration::seconds(601));
        let outcome = h.service.poll_flow("ABCD-1234").await.unwrap();
        assert!(matches!(outcome.into_result(), Err(AuthError::SessionExpired)));
        assert_eq!(h.provider.calls(), 0);
        assert_eq!(h.store.user_count(), 0);

        let session = h.store.get_session_by_device_code("ABCD-1234").await.unwrap();
        assert_eq!(session.status(), DeviceAuthStatus::Expired);
        assert_eq!(session.user_id(), None);
    }

    #[tokio::test]
    async fn deadline_itself_is_still_pollable() {
        let h = harness();
        h.service.start_flow().await.unwrap();
        h.provider.push(TokenExchange::Pending);

        h.clock.advance(chrono::Duration::seconds(600));
        let outcome = h.service.poll_flow("ABCD-1234").await.unwrap();
        assert!(matches!(outcome, PollOutcome::Pending { .. }));
    }

    #[tokio::test]
    async fn pending_reports_time_left() {
        let h = harness();
        h.service.start_flow().await.unwrap();
        h.provider.push(TokenExchange::Pending);

        h.clock.advance(chrono::Duration::seconds(100));
        let outcome = h.service.poll_flow("ABCD-1234").await.unwrap();
        assert!(matches!(outcome, PollOutcome::Pending { expires_in: 500, .. }));
    }

    #[tokio::test]
    async fn externally_expired_session_is_observed() {
        let h = harness();
        h.service.start_flow().await.unwrap();

        let mut session = h.store.get_session_by_device_code("ABCD-1234").await.unwrap();
        session.expire().unwrap();
        h.store.update_session(&session).await.unwrap();

        h.provider.grant();
        let outcome = h.service.poll_flow("ABCD-1234").await.unwrap();
        assert!(matches!(outcome, PollOutcome::Expired));
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test]
    async fn authorized_session_past_deadline_stays_authorized() {
        let h = harness();
        h.service.start_flow().await.unwrap();
        h.provider.grant();
        h.service.poll_flow("ABCD-1234").await.unwrap().into_result().unwrap();

        h.clock.advance(chrono::Duration::seconds(601));
        let outcome = h.service.poll_flow("ABCD-1234").await.unwrap();
        assert!(matches!(outcome, PollOutcome::Expired));

        let session = h.store.get_session_by_device_code("ABCD-1234").await.unwrap();
        assert_eq!(session.status(), DeviceAuthStatus::Authorized);
    }

    #[tokio::test]
    async fn slow_down_is_still_pending() {
        let h = harness();
        h.service.start_flow().await.unwrap();
        h.provider.push(TokenExchange::SlowDown);

        let outcome = h.service.poll_flow("ABCD-1234").await.unwrap();
        assert!(matches!(outcome, PollOutcome::Pending { slow_down: true, interval: 5, .. }));
        assert_eq!(outcome.status(), PollStatus::Pending);
    }

    #[tokio::test]
    async fn denial_is_terminal_for_the_caller() {
        let h = harness();
        h.service.start_flow().await.unwrap();
        h.provider.push(TokenExchange::Rejected { error: "access_denied".into() });

        let outcome = h.service.poll_flow("ABCD-1234").await.unwrap();
        assert_eq!(outcome.status(), PollStatus::Denied);
        assert!(matches!(
            outcome.into_result(),
            Err(AuthError::TokenExchangeFailed(reason)) if reason == "access_denied"
        ));
        assert_eq!(h.store.user_count(), 0);
    }

    #[tokio::test]
    async fn unknown_device_code_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.service.poll_flow("nope").await,
            Err(AuthError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn provider_failure_on_start_persists_nothing() {
        let h = harness();
        h.provider.fail_start.store(true, Ordering::SeqCst);
        assert!(matches!(
            h.service.start_flow().await,
            Err(AuthError::ProviderUnavailable(_))
        ));
        assert_eq!(h.store.session_count(), 0);
    }

    #[tokio::test]
    async fn provider_failure_on_poll_leaves_session_pending() {
        let h = harness();
        h.service.start_flow().await.unwrap();
        // Nothing scripted: the exchange errors out.
        assert!(matches!(
            h.service.poll_flow("ABCD-1234").await,
            Err(AuthError::ProviderUnavailable(_))
        ));
        let session = h.store.get_session_by_device_code("ABCD-1234").await.unwrap();
        assert_eq!(session.status(), DeviceAuthStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_start_is_a_persistence_error() {
        let h = harness();
        h.service.start_flow().await.unwrap();
        assert!(matches!(
            h.service.start_flow().await,
            Err(AuthError::Persistence(StoreError::Conflict(_)))
        ));
    }

    #[tokio::test]
    async fn returning_user_keeps_their_id() {
        let h = harness();
        let existing = User { is_active: false, ..User::new("google-42", Utc::now()) };
        h.store.create_user(&existing).await.unwrap();

        h.service.start_flow().await.unwrap();
        h.provider.grant();
        let (user, _) = h.service.poll_flow("ABCD-1234").await.unwrap().into_result().unwrap();

        assert_eq!(user.id, existing.id);
        assert!(user.is_active);
        assert!(h.store.get_user(&existing.id).await.unwrap().is_active);
        assert_eq!(h.store.user_count(), 1);
    }

    #[tokio::test]
    async fn deleted_account_cannot_be_reissued() {
        let h = harness();
        h.service.start_flow().await.unwrap();
        h.provider.grant();
        let (user, _) = h.service.poll_flow("ABCD-1234").await.unwrap().into_result().unwrap();

        h.store.delete_user(&user.id).await.unwrap();
        let outcome = h.service.poll_flow("ABCD-1234").await.unwrap();
        assert_eq!(outcome.status(), PollStatus::Denied);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_polls_create_one_user() {
        let h = harness();
        h.service.start_flow().await.unwrap();
        for _ in 0..8 {
            h.provider.grant();
        }

        let polls: Vec<_> = (0..8)
            .map(|_| {
                let service = h.service.clone();
                tokio::spawn(async move { service.poll_flow("ABCD-1234").await })
            })
            .collect();

        let mut ids = Vec::new();
        for poll in polls {
            let (user, _) = poll.await.unwrap().unwrap().into_result().unwrap();
            ids.push(user.id);
        }
        let distinct: HashSet<_> = ids.into_iter().collect();
        assert_eq!(distinct.len(), 1);
        assert_eq!(h.store.user_count(), 1);
    }

    #[derive(Debug)]
    struct UnboundedLifetime;

    #[async_trait]
    impl OAuthProvider for UnboundedLifetime {
        fn id(&self) -> &'static str {
            "unbounded"
        }

        async fn request_device_code(&self) -> anyhow::Result<DeviceFlowResponse> {
            Ok(DeviceFlowResponse {
                device_code: "ABCD-1234".into(),
                user_code: "WXYZ-5678".into(),
                verification_uri: "https://example.test/device".into(),
                expires_in: u64::MAX,
                interval: 5,
            })
        }

        async fn exchange_device_code(&self, _device_code: &str) -> anyhow::Result<TokenExchange> {
            Ok(TokenExchange::Pending)
        }

        async fn fetch_identity(&self, _access_token: &str) -> anyhow::Result<ProviderIdentity> {
            anyhow::bail!("not used")
        }
    }

    #[tokio::test]
    async fn absurd_lifetime_from_provider_is_an_upstream_error() {
        let store = Arc::new(MemoryStore::new());
        let clock: ClockDyn = Arc::new(ManualClock::new(Utc::now()));
        let service = DeviceFlowService::new(
            store.clone(),
            Arc::new(UnboundedLifetime),
            TokenSigner::new(b"device-flow-test", clock.clone()),
            clock,
        );

        assert!(matches!(
            service.start_flow().await,
            Err(AuthError::ProviderUnavailable(_))
        ));
        assert_eq!(store.session_count(), 0);
    }

    /// Memory store whose session writes take a while to land.
    #[derive(Debug, Default)]
    struct SlowSessionWrites {
        inner: MemoryStore,
    }

    #[async_trait]
    impl AuthStore for SlowSessionWrites {
        async fn create_session(&self, session: &DeviceAuthSession) -> Result<(), StoreError> {
            self.inner.create_session(session).await
        }

        async fn get_session_by_device_code(&self, device_code: &str) -> Result<DeviceAuthSession, StoreError> {
            self.inner.get_session_by_device_code(device_code).await
        }

        async fn update_session(&self, session: &DeviceAuthSession) -> Result<(), StoreError> {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            self.inner.update_session(session).await
        }

        async fn get_user(&self, id: &str) -> Result<User, StoreError> {
            self.inner.get_user(id).await
        }

        async fn get_user_by_external_id(&self, external_id: &str) -> Result<User, StoreError> {
            self.inner.get_user_by_external_id(external_id).await
        }

        async fn create_user(&self, user: &User) -> Result<(), StoreError> {
            self.inner.create_user(user).await
        }

        async fn update_user(&self, user: &User) -> Result<(), StoreError> {
            self.inner.update_user(user).await
        }

        async fn delete_user(&self, id: &str) -> Result<(), StoreError> {
            self.inner.delete_user(id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn caller_gone_mid_commit_still_completes_it() {
        let store = Arc::new(SlowSessionWrites::default());
        let provider = ScriptedProvider::new("google-42");
        let clock: ClockDyn = Arc::new(ManualClock::new(Utc::now()));
        let service = DeviceFlowService::new(
            store.clone(),
            provider.clone(),
            TokenSigner::new(b"device-flow-test", clock.clone()),
            clock,
        );
        service.start_flow().await.unwrap();
        provider.grant();

        let cut_short = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            service.poll_flow("ABCD-1234"),
        )
        .await;
        assert!(cut_short.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        let session = store.inner.get_session_by_device_code("ABCD-1234").await.unwrap();
        assert_eq!(session.status(), DeviceAuthStatus::Authorized);
        let user = store.inner.get_user(session.user_id().unwrap()).await.unwrap();
        assert_eq!(user.external_id, "google-42");

        let (again, _) = service.poll_flow("ABCD-1234").await.unwrap().into_result().unwrap();
        assert_eq!(again.id, user.id);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_gone_before_commit_leaves_session_pending() {
        let h = harness();
        h.service.start_flow().await.unwrap();
        h.provider.slow_identity.store(true, Ordering::SeqCst);
        h.provider.grant();

        let cut_short = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            h.service.poll_flow("ABCD-1234"),
        )
        .await;
        assert!(cut_short.is_err());

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        let session = h.store.get_session_by_device_code("ABCD-1234").await.unwrap();
        assert_eq!(session.status(), DeviceAuthStatus::Pending);
        assert_eq!(session.user_id(), None);
        assert_eq!(h.store.user_count(), 0);
    }
}
