//! Session lifecycle: login, registration, guest provisioning, upgrade,
//! token persistence, and the expired-guest sweep.

use crate::guest::{guest_access_decision, GuestCredentials, GuestDecision, UpgradeRequest};
use crate::{validate_upgrade, SessionError, SessionResult, MIN_PASSWORD_LEN};
use aliens_backend::records::{self, ListResult, UserRecord};
use aliens_backend::{
    filter_and, filter_eq, filter_lt, multipart, AuthToken, BackendError, ListQuery,
    PocketBaseClient,
};
use aliens_types::Profile;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::MissedTickBehavior;

/// Session state changes fanned out to subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    LoggedIn(Profile),
    LoggedOut,
    /// A guest session passed its expiry and was dropped locally.
    GuestExpired,
}

/// New permanent-account registration request.
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub password_confirm: String,
    pub name: String,
    /// Optional avatar, sent as a multipart upload with the record.
    pub avatar: Option<AvatarUpload>,
}

/// An avatar image to upload alongside a profile update.
#[derive(Debug, Clone)]
pub struct AvatarUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Partial profile update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub bio: Option<String>,
    pub native_languages: Option<Vec<String>>,
    pub learning_languages: Option<Vec<String>>,
    pub age: Option<u32>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub interests: Option<Vec<String>>,
    pub avatar: Option<AvatarUpload>,
}

/// Format a datetime the way the backend stores them.
pub fn backend_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.3fZ").to_string()
}

/// Owns the authenticated identity and every operation that changes it.
///
/// Intended to live behind an `Arc` shared by the stores and the CLI. All
/// guest provisioning goes through one async mutex so concurrent
/// `ensure_guest_access` calls cannot create duplicate accounts.
pub struct SessionManager {
    client: Arc<PocketBaseClient>,
    verbose_auth_errors: bool,
    session_file: Option<PathBuf>,
    state: RwLock<Option<Profile>>,
    /// Password of the currently provisioned guest, needed as `oldPassword`
    /// when the account is upgraded.
    guest_password: RwLock<Option<String>>,
    guest_gate: Mutex<()>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(client: Arc<PocketBaseClient>, verbose_auth_errors: bool) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            client,
            verbose_auth_errors,
            session_file: None,
            state: RwLock::new(None),
            guest_password: RwLock::new(None),
            guest_gate: Mutex::new(()),
            event_tx,
        }
    }

    /// Persist the bearer token to `path` so sessions survive restarts.
    pub fn with_session_file(mut self, path: PathBuf) -> Self {
        self.session_file = Some(path);
        self
    }

    /// Subscribe to session state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// The profile of the active session, if any.
    pub async fn current_profile(&self) -> Option<Profile> {
        self.state.read().await.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.is_authenticated()
    }

    fn auth_failure(&self, generic: &str, err: &BackendError) -> String {
        tracing::error!(error = %err, "{generic}");
        if self.verbose_auth_errors {
            format!("{generic}: {err}")
        } else {
            generic.to_string()
        }
    }

    async fn install_session(&self, profile: Profile) -> SessionResult<Profile> {
        self.persist_token()?;
        *self.state.write().await = Some(profile.clone());
        let _ = self.event_tx.send(SessionEvent::LoggedIn(profile.clone()));
        Ok(profile)
    }

    /// Exchange credentials for a session.
    ///
    /// On failure the returned message stays generic unless
    /// `verbose_auth_errors` is set; the backend detail is always logged.
    pub async fn login(&self, email: &str, password: &str) -> SessionResult<Profile> {
        let auth = self
            .client
            .auth_with_password(email, password)
            .await
            .map_err(|e| SessionError::LoginFailed(self.auth_failure("Login failed", &e)))?;

        let profile = auth.record.into_profile(Some(self.client.base_url()));
        tracing::info!(user = %profile.id, "logged in");
        self.install_session(profile).await
    }

    /// Create a permanent account and sign into it.
    ///
    /// Field validation happens before any network traffic.
    pub async fn register(&self, request: &RegisterRequest) -> SessionResult<Profile> {
        if request.email.trim().is_empty()
            || request.name.trim().is_empty()
            || request.password.is_empty()
            || request.password_confirm.is_empty()
        {
            return Err(SessionError::MissingFields);
        }
        if request.password != request.password_confirm {
            return Err(SessionError::PasswordMismatch);
        }
        if request.password.len() < MIN_PASSWORD_LEN {
            return Err(SessionError::PasswordTooShort);
        }

        let created = if let Some(avatar) = &request.avatar {
            let form = multipart::Form::new()
                .text("email", request.email.clone())
                .text("password", request.password.clone())
                .text("passwordConfirm", request.password_confirm.clone())
                .text("name", request.name.clone())
                .text("role", "user")
                .text("isRegistered", "true")
                .text("emailVisibility", "false")
                .part(
                    "avatar",
                    multipart::Part::bytes(avatar.bytes.clone()).file_name(avatar.filename.clone()),
                );
            self.client.create_multipart(records::USERS, form).await
        } else {
            let body = serde_json::json!({
                "email": request.email,
                "password": request.password,
                "passwordConfirm": request.password_confirm,
                "name": request.name,
                "role": "user",
                "isRegistered": true,
                "emailVisibility": false,
            });
            self.client.create_unauthenticated(records::USERS, &body).await
        };
        let record: UserRecord = created.map_err(|e| {
            SessionError::RegistrationFailed(self.auth_failure("Registration failed", &e))
        })?;
        tracing::info!(user = %record.id, "account created");

        self.login(&request.email, &request.password).await
    }

    /// Provision a throwaway guest account and sign into it.
    pub async fn guest_login(&self) -> SessionResult<Profile> {
        let creds = GuestCredentials::generate();
        let body = serde_json::json!({
            "email": creds.email,
            "password": creds.password,
            "passwordConfirm": creds.password,
            "name": creds.name,
            "role": "guest",
            "isRegistered": false,
            "expiresAt": backend_timestamp(creds.expires_at),
            "emailVisibility": false,
        });

        let record: UserRecord = self
            .client
            .create_unauthenticated(records::USERS, &body)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "guest account creation failed");
                SessionError::GuestProvisioningFailed
            })?;
        tracing::info!(user = %record.id, expires_at = %creds.expires_at, "guest account created");

        let auth = self
            .client
            .auth_with_password(&creds.email, &creds.password)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "guest sign-in failed");
                SessionError::GuestProvisioningFailed
            })?;

        *self.guest_password.write().await = Some(creds.password);
        let profile = auth.record.into_profile(Some(self.client.base_url()));
        self.install_session(profile).await
    }

    /// Guarantee a usable session for guest-accessible content.
    ///
    /// A live session of any kind is kept. An expired guest is dropped and
    /// replaced with a fresh one. No session at all provisions a guest.
    /// Serialized internally so concurrent callers share one provisioning.
    pub async fn ensure_guest_access(&self) -> SessionResult<Profile> {
        let _gate = self.guest_gate.lock().await;

        let current = self.state.read().await.clone();
        match guest_access_decision(current.as_ref(), Utc::now()) {
            GuestDecision::UseCurrent => current.ok_or(SessionError::NotAuthenticated),
            GuestDecision::ReplaceExpired => {
                tracing::info!("replacing expired guest session");
                self.clear_session().await?;
                let _ = self.event_tx.send(SessionEvent::GuestExpired);
                self.guest_login().await
            }
            GuestDecision::Provision => self.guest_login().await,
        }
    }

    /// Turn the current guest into a permanent account.
    ///
    /// The role flip and the password change are separate backend calls;
    /// the password rotation invalidates the held token, so the upgrade
    /// finishes by signing back in with the new credentials.
    pub async fn upgrade_guest(&self, request: &UpgradeRequest) -> SessionResult<Profile> {
        let current = self.state.read().await.clone();
        validate_upgrade(current.as_ref(), request, Utc::now())?;
        let profile = current.ok_or(SessionError::NotAuthenticated)?;

        let body = serde_json::json!({
            "email": request.email,
            "name": request.name,
            "role": "user",
            "isRegistered": true,
            "expiresAt": "",
        });
        let _: UserRecord = self
            .client
            .update(records::USERS, &profile.id, &body)
            .await?;

        let mut password_body = serde_json::json!({
            "password": request.password,
            "passwordConfirm": request.password_confirm,
        });
        if let Some(old) = self.guest_password.read().await.clone() {
            password_body["oldPassword"] = serde_json::Value::String(old);
        }
        let _: UserRecord = self
            .client
            .update(records::USERS, &profile.id, &password_body)
            .await?;

        let auth = self
            .client
            .auth_with_password(&request.email, &request.password)
            .await
            .map_err(|e| SessionError::LoginFailed(self.auth_failure("Login failed", &e)))?;

        *self.guest_password.write().await = None;
        let upgraded = auth.record.into_profile(Some(self.client.base_url()));
        tracing::info!(user = %upgraded.id, "guest upgraded to permanent account");
        self.install_session(upgraded).await
    }

    /// Drop the local session. The backend account is untouched.
    pub async fn logout(&self) -> SessionResult<()> {
        self.clear_session().await?;
        let _ = self.event_tx.send(SessionEvent::LoggedOut);
        tracing::info!("logged out");
        Ok(())
    }

    /// Restore a persisted session, validating the stored token against the
    /// backend. A rejected or missing token leaves the manager anonymous.
    pub async fn check_auth(&self) -> SessionResult<Option<Profile>> {
        let Some(path) = &self.session_file else {
            return Ok(None);
        };
        let Some(token) = Self::load_token(path)? else {
            return Ok(None);
        };

        self.client.set_token(token);
        match self.client.auth_refresh().await {
            Ok(auth) => {
                let profile = auth.record.into_profile(Some(self.client.base_url()));
                self.persist_token()?;
                *self.state.write().await = Some(profile.clone());
                tracing::info!(user = %profile.id, "session restored");
                Ok(Some(profile))
            }
            Err(e) => {
                tracing::warn!(error = %e, "stored session rejected");
                self.clear_session().await?;
                Ok(None)
            }
        }
    }

    /// Patch the current profile. Uploads go as multipart, plain field
    /// changes as JSON.
    pub async fn update_profile(&self, update: ProfileUpdate) -> SessionResult<Profile> {
        let profile = self
            .state
            .read()
            .await
            .clone()
            .ok_or(SessionError::NotAuthenticated)?;

        let record: UserRecord = if update.avatar.is_some() {
            self.client
                .update_multipart(records::USERS, &profile.id, Self::update_form(update))
                .await?
        } else {
            self.client
                .update(records::USERS, &profile.id, &Self::update_body(&update))
                .await?
        };

        let updated = record.into_profile(Some(self.client.base_url()));
        *self.state.write().await = Some(updated.clone());
        Ok(updated)
    }

    fn update_body(update: &ProfileUpdate) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        if let Some(name) = &update.name {
            body.insert("name".into(), name.clone().into());
        }
        if let Some(bio) = &update.bio {
            body.insert("bio".into(), bio.clone().into());
        }
        if let Some(langs) = &update.native_languages {
            body.insert("nativeLanguages".into(), langs.clone().into());
        }
        if let Some(langs) = &update.learning_languages {
            body.insert("learningLanguages".into(), langs.clone().into());
        }
        if let Some(age) = update.age {
            body.insert("age".into(), age.into());
        }
        if let Some(country) = &update.country {
            body.insert("country".into(), country.clone().into());
        }
        if let Some(city) = &update.city {
            body.insert("city".into(), city.clone().into());
        }
        if let Some(interests) = &update.interests {
            body.insert("interests".into(), interests.clone().into());
        }
        serde_json::Value::Object(body)
    }

    fn update_form(update: ProfileUpdate) -> multipart::Form {
        let mut form = multipart::Form::new();
        if let Some(name) = update.name {
            form = form.text("name", name);
        }
        if let Some(bio) = update.bio {
            form = form.text("bio", bio);
        }
        if let Some(langs) = update.native_languages {
            for lang in langs {
                form = form.text("nativeLanguages", lang);
            }
        }
        if let Some(langs) = update.learning_languages {
            for lang in langs {
                form = form.text("learningLanguages", lang);
            }
        }
        if let Some(age) = update.age {
            form = form.text("age", age.to_string());
        }
        if let Some(country) = update.country {
            form = form.text("country", country);
        }
        if let Some(city) = update.city {
            form = form.text("city", city);
        }
        if let Some(interests) = update.interests {
            for interest in interests {
                form = form.text("interests", interest);
            }
        }
        if let Some(avatar) = update.avatar {
            let part = multipart::Part::bytes(avatar.bytes).file_name(avatar.filename);
            form = form.part("avatar", part);
        }
        form
    }

    /// Periodically drop the local session once a guest passes its expiry.
    pub fn spawn_expiry_watcher(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let expired = manager
                    .state
                    .read()
                    .await
                    .as_ref()
                    .map(|p| p.is_guest() && p.is_expired(Utc::now()))
                    .unwrap_or(false);
                if expired {
                    tracing::info!("guest session expired");
                    if let Err(e) = manager.clear_session().await {
                        tracing::warn!(error = %e, "failed to clear expired session");
                    }
                    let _ = manager.event_tx.send(SessionEvent::GuestExpired);
                }
            }
        })
    }

    /// Delete all guest accounts past their expiry. Returns the number of
    /// accounts removed; individual delete failures are logged and skipped.
    pub async fn cleanup_expired_guests(&self) -> SessionResult<u64> {
        let now = backend_timestamp(Utc::now());
        let filter = filter_and(&[filter_eq("role", "guest"), filter_lt("expiresAt", &now)]);
        let query = ListQuery::default().per_page(200).filter(filter);

        let expired: ListResult<UserRecord> = self.client.list(records::USERS, &query).await?;
        let total = expired.items.len();
        let mut deleted = 0u64;
        for user in expired.items {
            match self.client.delete(records::USERS, &user.id).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::warn!(user = %user.id, error = %e, "failed to delete expired guest")
                }
            }
        }
        tracing::info!(matched = total, deleted, "expired guest sweep finished");
        Ok(deleted)
    }

    async fn clear_session(&self) -> SessionResult<()> {
        self.client.clear_token();
        *self.state.write().await = None;
        *self.guest_password.write().await = None;
        self.persist_token()
    }

    /// Write the held token to the session file, or remove the file when
    /// there is none.
    fn persist_token(&self) -> SessionResult<()> {
        let Some(path) = &self.session_file else {
            return Ok(());
        };
        match self.client.token() {
            Some(token) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, serde_json::to_vec_pretty(&token)?)?;
            }
            None => {
                if path.exists() {
                    fs::remove_file(path)?;
                }
            }
        }
        Ok(())
    }

    fn load_token(path: &PathBuf) -> SessionResult<Option<AuthToken>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_manager() -> SessionManager {
        // Port 1 on loopback refuses connections immediately, so calls
        // that do reach the network fail fast.
        let client = Arc::new(PocketBaseClient::new("http://127.0.0.1:1"));
        SessionManager::new(client, false)
    }

    fn register_request() -> RegisterRequest {
        RegisterRequest {
            email: "ana@example.com".into(),
            password: "hunter22".into(),
            password_confirm: "hunter22".into(),
            name: "Ana".into(),
            avatar: None,
        }
    }

    #[test]
    fn backend_timestamp_uses_space_separator() {
        let dt = DateTime::parse_from_rfc3339("2024-01-02T15:04:05.000Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(backend_timestamp(dt), "2024-01-02 15:04:05.000Z");
    }

    #[tokio::test]
    async fn register_validates_before_any_network_call() {
        let manager = offline_manager();

        let mut request = register_request();
        request.name = String::new();
        assert!(matches!(
            manager.register(&request).await,
            Err(SessionError::MissingFields)
        ));

        let mut request = register_request();
        request.password_confirm = "other".into();
        assert!(matches!(
            manager.register(&request).await,
            Err(SessionError::PasswordMismatch)
        ));

        let mut request = register_request();
        request.password = "short".into();
        request.password_confirm = "short".into();
        assert!(matches!(
            manager.register(&request).await,
            Err(SessionError::PasswordTooShort)
        ));
    }

    #[tokio::test]
    async fn login_failure_message_stays_generic() {
        let manager = offline_manager();
        let err = manager.login("a@b.c", "password").await.unwrap_err();
        match err {
            SessionError::LoginFailed(message) => assert_eq!(message, "Login failed"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn login_failure_message_is_detailed_when_configured() {
        let client = Arc::new(PocketBaseClient::new("http://127.0.0.1:1"));
        let manager = SessionManager::new(client, true);
        let err = manager.login("a@b.c", "password").await.unwrap_err();
        match err {
            SessionError::LoginFailed(message) => {
                assert!(message.starts_with("Login failed: "));
                assert!(message.len() > "Login failed: ".len());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn upgrade_without_session_is_rejected_locally() {
        let manager = offline_manager();
        let request = UpgradeRequest {
            email: "real@example.com".into(),
            password: "hunter22".into(),
            password_confirm: "hunter22".into(),
            name: "Real".into(),
        };
        assert!(matches!(
            manager.upgrade_guest(&request).await,
            Err(SessionError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn cleanup_requires_a_token() {
        let manager = offline_manager();
        let result = manager.cleanup_expired_guests().await;
        assert!(matches!(
            result,
            Err(SessionError::Backend(BackendError::NotAuthenticated))
        ));
    }

    #[tokio::test]
    async fn check_auth_without_session_file_is_anonymous() {
        let manager = offline_manager();
        let restored = manager.check_auth().await.unwrap();
        assert!(restored.is_none());
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn check_auth_with_rejected_token_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let session_file = dir.path().join("session.json");
        fs::write(
            &session_file,
            serde_json::to_vec(&AuthToken {
                token: "stale".into(),
                record_id: "u1".into(),
            })
            .unwrap(),
        )
        .unwrap();

        let client = Arc::new(PocketBaseClient::new("http://127.0.0.1:1"));
        let manager = SessionManager::new(client, false).with_session_file(session_file.clone());

        let restored = manager.check_auth().await.unwrap();
        assert!(restored.is_none());
        assert!(!manager.is_authenticated());
        assert!(!session_file.exists());
    }

    #[tokio::test]
    async fn logout_clears_token_and_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let session_file = dir.path().join("session.json");

        let client = Arc::new(PocketBaseClient::new("http://127.0.0.1:1"));
        client.set_token(AuthToken {
            token: "tok".into(),
            record_id: "u1".into(),
        });
        let manager =
            SessionManager::new(client.clone(), false).with_session_file(session_file.clone());
        let mut events = manager.subscribe();

        manager.logout().await.unwrap();

        assert!(!client.is_authenticated());
        assert!(!session_file.exists());
        assert!(matches!(events.try_recv(), Ok(SessionEvent::LoggedOut)));
    }

    #[tokio::test]
    async fn update_profile_requires_a_session() {
        let manager = offline_manager();
        let result = manager.update_profile(ProfileUpdate::default()).await;
        assert!(matches!(result, Err(SessionError::NotAuthenticated)));
    }

    #[test]
    fn update_body_skips_unset_fields() {
        let update = ProfileUpdate {
            name: Some("Ana".into()),
            age: Some(29),
            ..Default::default()
        };
        let body = SessionManager::update_body(&update);
        let object = body.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["name"], "Ana");
        assert_eq!(object["age"], 29);
        assert!(!object.contains_key("bio"));
    }
}
