//! Guarded control plane operations

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tunnel_common::{CoreError, CoreResult, Settings, Tier};
use tunnel_entitlement::{
    EntitlementEngine, Payment, PaymentMethod, Plan, PlanCatalog, Subscription, SubscriptionManager,
};
use tunnel_identity::{
    issue_token, verify_token, Claims, CodeCheck, CodePurpose, CodeStore, ConsoleMailer,
    IdentityStore, Mailer, Subscriber,
};
use tunnel_protect::{EndpointClass, ProtectionLayer, RateLimitStatus};
use tunnel_push::{
    run_operator_publisher, run_session_publisher, OperatorHub, OperatorSnapshot, PushHub,
    SessionSnapshot,
};
use tunnel_registry::{Server, ServerConfig, ServerFilter, ServerRegistry, ServerUpdate};
use tunnel_session::{ConnectGrant, DisconnectSummary, SessionManager, SessionStatusView};
use uuid::Uuid;

/// Cadence of the background upkeep loop
pub const UPKEEP_INTERVAL: Duration = Duration::from_secs(30);

/// The assembled control plane
pub struct ControlPlane {
    settings: Settings,
    protect: Arc<ProtectionLayer>,
    identity: Arc<IdentityStore>,
    codes: CodeStore,
    mailer: Box<dyn Mailer>,
    entitlement: Arc<EntitlementEngine>,
    registry: Arc<ServerRegistry>,
    sessions: Arc<SessionManager>,
    push: Arc<PushHub>,
    operator: Arc<OperatorHub>,
}

impl ControlPlane {
    /// Assemble the plane with the given mailer
    pub fn new(settings: Settings, mailer: Box<dyn Mailer>) -> Self {
        let identity = Arc::new(IdentityStore::new());
        let catalog = Arc::new(PlanCatalog::with_defaults());
        let subscriptions = Arc::new(SubscriptionManager::new(catalog));
        let entitlement = Arc::new(EntitlementEngine::new(identity.clone(), subscriptions));
        let registry = Arc::new(ServerRegistry::new());
        let sessions = Arc::new(SessionManager::new(
            identity.clone(),
            entitlement.clone(),
            registry.clone(),
            settings.dns_servers.clone(),
        ));
        Self {
            protect: Arc::new(ProtectionLayer::new(&settings)),
            identity,
            codes: CodeStore::new(),
            mailer,
            entitlement,
            registry,
            sessions,
            push: Arc::new(PushHub::new()),
            operator: Arc::new(OperatorHub::new()),
            settings,
        }
    }

    /// Assemble the plane with the console mailer
    pub fn with_console_mailer(settings: Settings) -> Self {
        Self::new(settings, Box::new(ConsoleMailer))
    }

    // Accessors for the binding layer.

    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn entitlement(&self) -> &EntitlementEngine {
        &self.entitlement
    }

    // -- auth surface --------------------------------------------------

    /// Register a subscriber and send the verification code
    pub fn register(
        &self,
        ip: IpAddr,
        name: &str,
        email: &str,
        password: &str,
        phone: Option<&str>,
        country: Option<&str>,
    ) -> CoreResult<Subscriber> {
        self.guard(ip, EndpointClass::AuthRegister, None)?;
        let subscriber = self.identity.register(name, email, password, phone, country)?;
        let code = self
            .codes
            .issue(&subscriber.email, CodePurpose::EmailVerify, self.settings.otp_ttl_minutes)?;
        // Best effort: one attempt, the code can be re-requested.
        if let Err(err) = self.mailer.send_verification(&subscriber.email, &code) {
            tracing::warn!(error = err.code(), "verification mail not delivered");
        }
        Ok(subscriber)
    }

    /// Consume an email verification code
    pub fn verify_email(&self, ip: IpAddr, email: &str, code: &str) -> CoreResult<Subscriber> {
        self.guard(ip, EndpointClass::AuthVerifyEmail, None)?;
        match self.codes.verify(email, CodePurpose::EmailVerify, code) {
            CodeCheck::Valid => self.identity.mark_verified(email),
            CodeCheck::Expired => Err(CoreError::InvalidInput("verification code expired".into())),
            CodeCheck::Bad => Err(CoreError::InvalidInput("invalid verification code".into())),
        }
    }

    /// Authenticate and issue a bearer token
    pub fn login(&self, ip: IpAddr, email: &str, password: &str) -> CoreResult<String> {
        self.guard(ip, EndpointClass::AuthLogin, None)?;
        match self.identity.authenticate(email, password) {
            Ok(subscriber) => issue_token(&subscriber, &self.settings),
            Err(err) => {
                if err == CoreError::Unauthenticated {
                    self.protect.record_auth_failure(ip);
                }
                Err(err)
            }
        }
    }

    /// Issue a password reset code
    ///
    /// Always succeeds from the caller's perspective so the endpoint
    /// cannot be used to probe which emails exist.
    pub fn request_password_reset(&self, ip: IpAddr, email: &str) -> CoreResult<()> {
        self.guard(ip, EndpointClass::AuthPasswordReset, None)?;
        if self.identity.get_by_email(email).is_ok() {
            let code =
                self.codes
                    .issue(email, CodePurpose::PasswordReset, self.settings.otp_ttl_minutes)?;
            if let Err(err) = self.mailer.send_password_reset(email, &code) {
                tracing::warn!(error = err.code(), "reset mail not delivered");
            }
        }
        Ok(())
    }

    /// Consume a reset code and set the new password
    pub fn reset_password(
        &self,
        ip: IpAddr,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> CoreResult<()> {
        self.guard(ip, EndpointClass::AuthPasswordReset, None)?;
        match self.codes.verify(email, CodePurpose::PasswordReset, code) {
            CodeCheck::Valid => {
                let subscriber = self.identity.get_by_email(email)?;
                self.identity.set_password(subscriber.id, new_password)
            }
            CodeCheck::Expired => Err(CoreError::InvalidInput("reset code expired".into())),
            CodeCheck::Bad => Err(CoreError::InvalidInput("invalid reset code".into())),
        }
    }

    // -- subscriber surface --------------------------------------------

    /// The caller's own record
    pub fn profile(&self, ip: IpAddr, token: &str) -> CoreResult<Subscriber> {
        let claims = self.authenticate(token)?;
        self.guard(ip, EndpointClass::UsersProfile, Some(&claims))?;
        self.identity.get_by_id(claims.sub)
    }

    /// Update the caller's profile fields
    pub fn update_profile(
        &self,
        ip: IpAddr,
        token: &str,
        name: Option<&str>,
        phone: Option<&str>,
        country: Option<&str>,
    ) -> CoreResult<Subscriber> {
        let claims = self.authenticate(token)?;
        self.guard(ip, EndpointClass::UsersProfile, Some(&claims))?;
        self.identity.update_profile(claims.sub, name, phone, country)
    }

    // -- plans and payments --------------------------------------------

    /// Assignable plans
    pub fn list_plans(&self, ip: IpAddr) -> CoreResult<Vec<Plan>> {
        self.guard(ip, EndpointClass::Subscriptions, None)?;
        Ok(self.entitlement.subscriptions().catalog().list(true))
    }

    /// Start a subscription; returns the pending pair
    pub fn subscribe(
        &self,
        ip: IpAddr,
        token: &str,
        plan_id: Uuid,
        auto_renew: bool,
        method: PaymentMethod,
    ) -> CoreResult<(Subscription, Payment)> {
        let claims = self.authenticate(token)?;
        self.guard(ip, EndpointClass::Subscriptions, Some(&claims))?;
        self.entitlement
            .subscriptions()
            .assign(claims.sub, plan_id, auto_renew, method)
    }

    /// Provider webhook: confirm or fail a payment
    pub fn payment_callback(
        &self,
        ip: IpAddr,
        webhook_secret: &str,
        payment_id: Uuid,
        external_status: &str,
    ) -> CoreResult<Subscription> {
        self.guard(ip, EndpointClass::Payments, None)?;
        if webhook_secret != self.settings.payment_webhook_secret {
            return Err(CoreError::Unauthenticated);
        }
        let subscription = self
            .entitlement
            .subscriptions()
            .confirm_payment(payment_id, external_status)?;
        // Reconcile the premium cache right away rather than waiting
        // for the next admission.
        let subscriber = self.identity.get_by_id(subscription.subscriber_id)?;
        self.entitlement.resolve(&subscriber)?;
        Ok(subscription)
    }

    /// Cancel the caller's subscription, keeping access until expiry
    pub fn cancel_subscription(&self, ip: IpAddr, token: &str) -> CoreResult<Subscription> {
        let claims = self.authenticate(token)?;
        self.guard(ip, EndpointClass::Subscriptions, Some(&claims))?;
        self.entitlement.subscriptions().cancel(claims.sub)
    }

    // -- vpn surface ---------------------------------------------------

    /// Servers visible to the caller
    pub fn list_servers(
        &self,
        ip: IpAddr,
        token: Option<&str>,
        filter: ServerFilter,
    ) -> CoreResult<Vec<Server>> {
        let claims = match token {
            Some(token) => Some(self.authenticate(token)?),
            None => None,
        };
        self.guard(ip, EndpointClass::VpnServersList, claims.as_ref())?;
        Ok(self.registry.list(&filter))
    }

    /// Admit the caller and open a session
    pub fn connect(
        &self,
        ip: IpAddr,
        token: &str,
        location: Option<&str>,
        client_public_key: &str,
        requested_tier: Option<Tier>,
    ) -> CoreResult<ConnectGrant> {
        let claims = self.authenticate(token)?;
        self.guard(ip, EndpointClass::VpnConnect, Some(&claims))?;
        self.sessions
            .connect(claims.handle, location, client_public_key, requested_tier)
    }

    /// Close the caller's session with reported byte counters
    pub fn disconnect(
        &self,
        ip: IpAddr,
        token: &str,
        session_id: Uuid,
        bytes_sent: u64,
        bytes_received: u64,
    ) -> CoreResult<DisconnectSummary> {
        let claims = self.authenticate(token)?;
        self.guard(ip, EndpointClass::VpnDisconnect, Some(&claims))?;
        self.sessions
            .disconnect(session_id, claims.handle, bytes_sent, bytes_received)
    }

    /// Snapshot the caller's current (or named) session
    pub fn status(
        &self,
        ip: IpAddr,
        token: &str,
        session_id: Option<Uuid>,
    ) -> CoreResult<SessionStatusView> {
        let claims = self.authenticate(token)?;
        self.guard(ip, EndpointClass::VpnStatus, Some(&claims))?;
        self.sessions.status(claims.handle, session_id)
    }

    /// Record a liveness proof for the caller's session
    pub fn heartbeat(&self, ip: IpAddr, token: &str, session_id: Uuid) -> CoreResult<()> {
        let claims = self.authenticate(token)?;
        self.guard(ip, EndpointClass::VpnStatus, Some(&claims))?;
        let session = self
            .sessions
            .connected_session(claims.sub)
            .ok_or(CoreError::NotConnected)?;
        if session.id != session_id {
            return Err(CoreError::NotFound(format!("session {session_id}")));
        }
        self.sessions.touch(session_id)
    }

    // -- push channels -------------------------------------------------

    /// Open the caller's live metrics channel
    ///
    /// A second open supersedes the first. The publisher task emits at
    /// the configured cadence until the session ends or the channel is
    /// taken over.
    pub fn open_session_channel(
        &self,
        ip: IpAddr,
        token: &str,
    ) -> CoreResult<broadcast::Receiver<SessionSnapshot>> {
        let claims = self.authenticate(token)?;
        self.guard(ip, EndpointClass::WebsocketSession, Some(&claims))?;

        let (receiver, generation) = self.push.open(claims.sub);
        tokio::spawn(run_session_publisher(
            self.push.clone(),
            self.sessions.clone(),
            claims.sub,
            generation,
            Duration::from_secs(self.settings.metrics_push_interval_seconds.max(1)),
        ));
        Ok(receiver)
    }

    /// Attach to the operator aggregate channel (super-users only)
    pub fn open_operator_channel(
        &self,
        ip: IpAddr,
        token: &str,
    ) -> CoreResult<broadcast::Receiver<OperatorSnapshot>> {
        let claims = self.authenticate(token)?;
        if !claims.superuser {
            return Err(CoreError::Unauthorized("operator channel requires a super-user".into()));
        }
        // Super-users bypass the limiter, so the guard is a no-op here;
        // kept so the call sites stay uniform.
        self.guard(ip, EndpointClass::WebsocketAdmin, Some(&claims))?;
        Ok(self.operator.subscribe())
    }

    // -- operator surface ----------------------------------------------

    /// Limiter status for an (endpoint, IP) pair
    pub fn rate_limit_status(
        &self,
        ip: IpAddr,
        token: &str,
        target: IpAddr,
        endpoint: EndpointClass,
    ) -> CoreResult<RateLimitStatus> {
        let claims = self.authenticate(token)?;
        if !claims.superuser {
            return Err(CoreError::Unauthorized("rate limit inspection requires a super-user".into()));
        }
        self.guard(ip, EndpointClass::General, Some(&claims))?;
        Ok(self.protect.status(target, endpoint))
    }

    /// Clear limiter state for an (endpoint, IP) pair
    pub fn reset_rate_limit(
        &self,
        ip: IpAddr,
        token: &str,
        target: IpAddr,
        endpoint: EndpointClass,
    ) -> CoreResult<bool> {
        let claims = self.authenticate(token)?;
        if !claims.superuser {
            return Err(CoreError::Unauthorized("rate limit reset requires a super-user".into()));
        }
        self.guard(ip, EndpointClass::General, Some(&claims))?;
        Ok(self.protect.reset(target, endpoint))
    }

    /// Lift a ban
    pub fn unban(&self, ip: IpAddr, token: &str, target: IpAddr) -> CoreResult<bool> {
        let claims = self.authenticate(token)?;
        if !claims.superuser {
            return Err(CoreError::Unauthorized("unban requires a super-user".into()));
        }
        self.guard(ip, EndpointClass::General, Some(&claims))?;
        Ok(self.protect.unban(target))
    }

    /// Register a tunnel node (super-users only)
    pub fn create_server(&self, ip: IpAddr, token: &str, config: ServerConfig) -> CoreResult<Server> {
        let claims = self.authenticate(token)?;
        if !claims.superuser {
            return Err(CoreError::Unauthorized("server management requires a super-user".into()));
        }
        self.guard(ip, EndpointClass::General, Some(&claims))?;
        self.registry.create(config)
    }

    /// Update a tunnel node (super-users only)
    pub fn update_server(
        &self,
        ip: IpAddr,
        token: &str,
        server_id: Uuid,
        update: ServerUpdate,
    ) -> CoreResult<Server> {
        let claims = self.authenticate(token)?;
        if !claims.superuser {
            return Err(CoreError::Unauthorized("server management requires a super-user".into()));
        }
        self.guard(ip, EndpointClass::General, Some(&claims))?;
        self.registry.update(server_id, update)
    }

    // -- background upkeep ---------------------------------------------

    /// One pass of periodic maintenance
    ///
    /// Reaps stale sessions, reconciles server load from the session
    /// census, and applies subscription expiry.
    pub fn upkeep(&self) {
        let reaped = self
            .sessions
            .reap_stale(self.settings.session_stale_threshold_seconds);
        self.registry.reconcile_loads(&self.sessions.census());
        let expired = self.entitlement.subscriptions().expire_due();
        if reaped > 0 || expired > 0 {
            tracing::info!(reaped, expired, "upkeep pass");
        }
    }

    /// Drive upkeep and the operator publisher forever
    pub fn spawn_background(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let upkeep = {
            let plane = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(UPKEEP_INTERVAL);
                loop {
                    ticker.tick().await;
                    plane.upkeep();
                }
            })
        };
        let operator = tokio::spawn(run_operator_publisher(
            self.operator.clone(),
            self.identity.clone(),
            self.sessions.clone(),
            self.registry.clone(),
            self.protect.clone(),
            Duration::from_secs(self.settings.metrics_push_interval_seconds.max(1)),
        ));
        vec![upkeep, operator]
    }

    // -- internals -----------------------------------------------------

    fn authenticate(&self, token: &str) -> CoreResult<Claims> {
        verify_token(token, &self.settings)
    }

    fn guard(
        &self,
        ip: IpAddr,
        endpoint: EndpointClass,
        claims: Option<&Claims>,
    ) -> CoreResult<RateLimitStatus> {
        let subscriber = claims.map(|c| c.sub);
        let bypass = claims.map(|c| c.superuser).unwrap_or(false);
        self.protect.check(ip, endpoint, subscriber, bypass)
    }
}
