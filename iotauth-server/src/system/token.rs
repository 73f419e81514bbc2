use chrono::{Duration, Utc};
use iotauth_policy::{qualify, PolicyEngineClient};
use iotauth_types::error::ErrorKind;
use iotauth_types::key::{Key, KeyType};
use iotauth_types::methods::token::{
    CreateApiKeyParams, CreateApiKeyResponse, IdentifyParams, IdentifyResponse, IssueParams,
    IssueResponse, RefreshParams, RefreshResponse, RetrieveKeyResponse, RevokeResponse,
};
use iotauth_types::policy::{EntityType, Permission, PolicyReq, SubjectKind};
use iotauth_types::subject;
use iotauth_types::token::Token;
use ulid::Ulid;

use crate::error::from_policy_check;
use crate::tokenizer::TokenizerError;

use super::AuthService;

/// The caller identity resolved by `Identify` (§4.5.3): the originating
/// user, the domain the bearer token is scoped to (if any), the effective
/// subject carried in its claims, and the key type it was issued as.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub domain_id: Option<String>,
    pub subject: String,
    pub key_type: KeyType,
}

impl<C: PolicyEngineClient> AuthService<C> {
    /// §4.5.3. `Refresh` keys are rejected outright — a refresh token must
    /// never be accepted as a bearer credential. An expired API key is
    /// removed from the store as a side effect before the expiry error is
    /// re-emitted.
    #[tracing::instrument(skip(self, token))]
    pub async fn identify(&self, token: &Token) -> Result<Principal, ErrorKind> {
        let key = match self.ctx.tokenizer.parse(token) {
            Ok(key) => key,
            Err(TokenizerError::Expired(key)) => {
                if key.key_type == KeyType::Api {
                    let _ = self.ctx.repos.key.remove(&key.issuer, key.id).await;
                }
                return Err(ErrorKind::AuthenticationError("token has expired".into()));
            }
            Err(err) => return Err(ErrorKind::AuthenticationError(err.to_string())),
        };

        match key.key_type {
            KeyType::Refresh => Err(ErrorKind::AuthenticationError(
                "refresh tokens cannot be used as a bearer credential".into(),
            )),
            KeyType::Api => {
                self.ctx
                    .repos
                    .key
                    .retrieve(&key.issuer, key.id)
                    .await
                    .map_err(|_| ErrorKind::AuthenticationError("api key has been revoked".into()))?;
                Ok(principal_of(key))
            }
            KeyType::Access | KeyType::Recovery | KeyType::Invitation => Ok(principal_of(key)),
        }
    }

    pub async fn identify_params(
        &self,
        params: IdentifyParams,
    ) -> Result<IdentifyResponse, ErrorKind> {
        let principal = self.identify(&params.token).await?;
        Ok(IdentifyResponse {
            id: principal.subject.clone(),
            user_id: principal.user_id,
            domain_id: principal.domain_id,
        })
    }

    /// §4.5.1. Only Access/API/Recovery/Invitation are reachable through
    /// `Issue` directly; `Refresh`-typed keys are only ever minted by the
    /// dedicated `Refresh` operation below, which already holds the parsed
    /// refresh key it needs (see DESIGN.md for this resolution).
    #[tracing::instrument(skip(self, caller))]
    pub async fn issue(
        &self,
        caller: Option<&Token>,
        params: IssueParams,
    ) -> Result<IssueResponse, ErrorKind> {
        match params.r#type {
            KeyType::Api => self.issue_api_key_via_issue(caller).await,
            KeyType::Recovery => {
                self.issue_stateless(KeyType::Recovery, &params.user_id, Duration::minutes(5))
                    .await
            }
            KeyType::Invitation => {
                self.issue_stateless(KeyType::Invitation, &params.user_id, Duration::hours(24))
                    .await
            }
            KeyType::Access => {
                self.issue_access(&params.user_id, params.domain_id.as_deref())
                    .await
            }
            KeyType::Refresh => Err(ErrorKind::MalformedEntity(
                "refresh tokens are minted via Refresh, not Issue".into(),
            )),
        }
    }

    /// §4.5.1 "Refresh" branch + "Access (default)" emission. Parses the
    /// refresh token, requires it really is one and has not been revoked,
    /// then mints a fresh access/refresh pair the same way the initial
    /// login path does.
    #[tracing::instrument(skip(self, params))]
    pub async fn refresh(&self, params: RefreshParams) -> Result<RefreshResponse, ErrorKind> {
        let key = self
            .ctx
            .tokenizer
            .parse(&params.refresh_token)
            .map_err(|err| ErrorKind::AuthenticationError(err.to_string()))?;
        if key.key_type != KeyType::Refresh {
            return Err(ErrorKind::AuthenticationError(
                "token is not a refresh token".into(),
            ));
        }
        self.ctx
            .repos
            .key
            .retrieve(&key.issuer, key.id)
            .await
            .map_err(|_| ErrorKind::AuthenticationError("refresh token has been revoked".into()))?;

        let domain = params.domain_id.as_deref().or(key.domain.as_deref());
        let (access_token, refresh_token) = self.mint_access_refresh(&key.user, domain).await?;
        Ok(RefreshResponse {
            access_token,
            refresh_token,
            access_type: KeyType::Access,
        })
    }

    /// §4.5.2. Only Access-typed callers may revoke; removing a missing key
    /// surfaces the repository's `NotFound` unchanged.
    #[tracing::instrument(skip(self, caller))]
    pub async fn revoke(&self, caller: &Token, key_id: Ulid) -> Result<RevokeResponse, ErrorKind> {
        let principal = self.authenticate_access(caller).await?;
        self.ctx.repos.key.remove(&principal.user_id, key_id).await?;
        Ok(RevokeResponse {
            id: key_id.to_string(),
        })
    }

    /// `POST /keys` — a caller mints an API key for themselves, optionally
    /// overriding the subject it carries and how long it lives.
    #[tracing::instrument(skip(self, caller, params))]
    pub async fn create_api_key(
        &self,
        caller: &Token,
        params: CreateApiKeyParams,
    ) -> Result<CreateApiKeyResponse, ErrorKind> {
        let principal = self.authenticate_access(caller).await?;
        let duration = params.duration_secs.map(|secs| Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)));
        let (id, token) = self
            .mint_api_key(&principal, params.subject, duration)
            .await?;
        Ok(CreateApiKeyResponse {
            id: id.to_string(),
            access_token: token,
        })
    }

    /// `GET /keys/{id}` — looks up a key's public metadata; never exposes
    /// `issued_at`/`expires_at` beyond what the caller already has in hand.
    #[tracing::instrument(skip(self, caller))]
    pub async fn retrieve_key(
        &self,
        caller: &Token,
        key_id: Ulid,
    ) -> Result<RetrieveKeyResponse, ErrorKind> {
        let principal = self.authenticate_access(caller).await?;
        let key = self.ctx.repos.key.retrieve(&principal.user_id, key_id).await?;
        Ok(RetrieveKeyResponse {
            id: key.id.to_string(),
            r#type: key.key_type,
            issuer: key.issuer,
            subject: key.subject,
        })
    }

    async fn issue_api_key_via_issue(&self, caller: Option<&Token>) -> Result<IssueResponse, ErrorKind> {
        let caller_token = caller.ok_or_else(|| {
            ErrorKind::AuthenticationError("API key issuance requires a caller token".into())
        })?;
        let principal = self.authenticate_access(caller_token).await?;
        let (_, token) = self.mint_api_key(&principal, None, None).await?;
        Ok(IssueResponse {
            access_token: token,
            refresh_token: None,
            access_type: KeyType::Api,
        })
    }

    async fn issue_stateless(
        &self,
        key_type: KeyType,
        user_id: &str,
        ttl: Duration,
    ) -> Result<IssueResponse, ErrorKind> {
        let now = Utc::now();
        let key = Key::new(
            key_type,
            user_id.to_string(),
            user_id.to_string(),
            user_id.to_string(),
            None,
            now,
            Some(now + ttl),
        );
        let token = self
            .ctx
            .tokenizer
            .issue(&key)
            .map_err(|err| ErrorKind::AuthenticationError(err.to_string()))?;
        Ok(IssueResponse {
            access_token: token,
            refresh_token: None,
            access_type: key_type,
        })
    }

    async fn issue_access(
        &self,
        user_id: &str,
        domain_id: Option<&str>,
    ) -> Result<IssueResponse, ErrorKind> {
        let (access_token, refresh_token) = self.mint_access_refresh(user_id, domain_id).await?;
        Ok(IssueResponse {
            access_token,
            refresh_token: Some(refresh_token),
            access_type: KeyType::Access,
        })
    }

    /// §4.5.1's "Access (default)" emission, shared by `Issue` and
    /// `Refresh`: one subject resolution (§4.5.5), two tokens that differ
    /// only in type and expiry.
    async fn mint_access_refresh(
        &self,
        user_id: &str,
        domain_id: Option<&str>,
    ) -> Result<(Token, Token), ErrorKind> {
        let now = Utc::now();
        let subject = match domain_id {
            Some(domain) if !domain.is_empty() => self.check_user_domain(domain, user_id).await?,
            _ => String::new(),
        };

        let access_duration = Duration::from_std(self.ctx.config.access_duration)
            .unwrap_or_else(|_| Duration::hours(1));
        let refresh_duration = Duration::from_std(self.ctx.config.refresh_duration)
            .unwrap_or_else(|_| Duration::hours(24));

        let access_key = Key::new(
            KeyType::Access,
            user_id.to_string(),
            subject.clone(),
            user_id.to_string(),
            domain_id.map(str::to_string),
            now,
            Some(now + access_duration),
        );
        let refresh_key = Key::new(
            KeyType::Refresh,
            user_id.to_string(),
            subject,
            user_id.to_string(),
            domain_id.map(str::to_string),
            now,
            Some(now + refresh_duration),
        );
        self.ctx.repos.key.save(&refresh_key).await?;

        let access_token = self
            .ctx
            .tokenizer
            .issue(&access_key)
            .map_err(|err| ErrorKind::AuthenticationError(err.to_string()))?;
        let refresh_token = self
            .ctx
            .tokenizer
            .issue(&refresh_key)
            .map_err(|err| ErrorKind::AuthenticationError(err.to_string()))?;
        Ok((access_token, refresh_token))
    }

    async fn mint_api_key(
        &self,
        principal: &Principal,
        subject_override: Option<String>,
        duration: Option<Duration>,
    ) -> Result<(Ulid, Token), ErrorKind> {
        let now = Utc::now();
        let subject = subject_override.unwrap_or_else(|| principal.subject.clone());
        let key = Key::new(
            KeyType::Api,
            principal.user_id.clone(),
            subject,
            principal.user_id.clone(),
            None,
            now,
            duration.map(|d| now + d),
        );
        self.ctx.repos.key.save(&key).await?;
        let token = self
            .ctx
            .tokenizer
            .issue(&key)
            .map_err(|err| ErrorKind::AuthenticationError(err.to_string()))?;
        Ok((key.id, token))
    }

    /// §4.5.5. The single place binding a token to a domain: platform
    /// admins carry no domain scoping at all, everyone else must be a
    /// member of the domain under its encoded `domain_user` subject.
    pub(super) async fn check_user_domain(
        &self,
        domain: &str,
        user: &str,
    ) -> Result<String, ErrorKind> {
        if self.is_platform_admin(user).await? {
            return Ok(user.to_string());
        }

        let encoded = subject::encode(domain, user);
        let member_req = PolicyReq {
            subject_type: EntityType::User,
            subject_kind: SubjectKind::Id,
            subject: qualify(EntityType::User, &encoded),
            permission: Permission::Membership.to_string(),
            object_type: EntityType::Domain,
            object: domain.to_string(),
        };
        if self
            .ctx
            .policy_agent
            .check_policy(&member_req)
            .await
            .map_err(from_policy_check)?
        {
            return Ok(encoded);
        }

        Err(ErrorKind::AuthorizationError)
    }

    pub(super) async fn is_platform_admin(&self, user_id: &str) -> Result<bool, ErrorKind> {
        let req = PolicyReq {
            subject_type: EntityType::User,
            subject_kind: SubjectKind::Id,
            subject: qualify(EntityType::User, user_id),
            permission: Permission::Admin.to_string(),
            object_type: EntityType::Platform,
            object: self.ctx.config.platform_id.clone(),
        };
        self.ctx
            .policy_agent
            .check_policy(&req)
            .await
            .map_err(from_policy_check)
    }

    pub(super) async fn authenticate_access(&self, token: &Token) -> Result<Principal, ErrorKind> {
        let principal = self.identify(token).await?;
        if principal.key_type != KeyType::Access {
            return Err(ErrorKind::AuthenticationError(
                "caller token must be an access token".into(),
            ));
        }
        if principal.user_id.is_empty() {
            return Err(ErrorKind::AuthenticationError(
                "caller token has no issuer".into(),
            ));
        }
        Ok(principal)
    }
}

/// §4.5.4/§4.5.6's shared fallback: a domain-scoped token's subject is
/// already the encoded `domain_user` composite; a domain-less one carries an
/// empty subject, so callers fall back to the raw user id (matches the
/// domain creator's own Administrator tuple, which is keyed on the raw id).
pub(super) fn effective_subject(principal: &Principal) -> String {
    if principal.subject.is_empty() {
        principal.user_id.clone()
    } else {
        principal.subject.clone()
    }
}

fn principal_of(key: Key) -> Principal {
    Principal {
        user_id: key.user,
        domain_id: key.domain,
        subject: key.subject,
        key_type: key.key_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use iotauth_policy::{FakePolicyEngine, PolicyAgent};
    use iotauth_types::policy::{PolicyTuple, Relation};
    use std::sync::Arc;
    use tokio::sync::broadcast;

    async fn service() -> AuthService<FakePolicyEngine> {
        let pool = Arc::new(iotauth_storage::connect_tmp().await);
        crate::migrations::migrate(&pool).await.unwrap();
        let repos = crate::repos::Repos::new(pool);
        let config = Arc::new(crate::Config {
            log_level: "info".into(),
            secret_key: crate::SecretKey(b"test-secret".to_vec()),
            access_duration: std::time::Duration::from_secs(3600),
            refresh_duration: std::time::Duration::from_secs(86400),
            database_url: "sqlite::memory:".into(),
            policy_engine_addr: "127.0.0.1:0".into(),
            tracing_endpoint: None,
            trace_sample_ratio: None,
            instance_id: "test".into(),
            port: 0,
            issuer: "iotauth".into(),
            platform_id: "iotauth".into(),
        });
        let tokenizer = Arc::new(crate::tokenizer::Tokenizer::new(
            &config.secret_key.0,
            config.issuer.clone(),
        ));
        let policy_agent = Arc::new(PolicyAgent::new(Arc::new(FakePolicyEngine::new())));
        let (stop_tx, _) = broadcast::channel(1);
        AuthService::new(Context {
            config,
            repos,
            tokenizer,
            policy_agent,
            stop_tx,
        })
    }

    #[tokio::test]
    async fn issue_access_with_no_domain_carries_empty_subject() {
        let svc = service().await;
        let resp = svc
            .issue(
                None,
                IssueParams {
                    user_id: "u1".into(),
                    domain_id: None,
                    r#type: KeyType::Access,
                },
            )
            .await
            .unwrap();
        assert!(resp.refresh_token.is_some());
        let principal = svc.identify(&resp.access_token).await.unwrap();
        assert_eq!(principal.subject, "");
        assert_eq!(principal.user_id, "u1");
    }

    #[tokio::test]
    async fn identify_rejects_refresh_tokens() {
        let svc = service().await;
        let resp = svc
            .issue(
                None,
                IssueParams {
                    user_id: "u1".into(),
                    domain_id: None,
                    r#type: KeyType::Access,
                },
            )
            .await
            .unwrap();
        let refresh = resp.refresh_token.unwrap();
        assert!(matches!(
            svc.identify(&refresh).await,
            Err(ErrorKind::AuthenticationError(_))
        ));
    }

    #[tokio::test]
    async fn refresh_resolves_domain_scoped_subject() {
        let svc = service().await;
        svc.ctx
            .policy_agent
            .add_policy(PolicyTuple {
                subject_type: EntityType::User,
                subject: "d1_u1".into(),
                subject_relation: None,
                relation: Relation::Member,
                object_type: EntityType::Domain,
                object: "d1".into(),
            })
            .await
            .unwrap();

        let issued = svc
            .issue(
                None,
                IssueParams {
                    user_id: "u1".into(),
                    domain_id: None,
                    r#type: KeyType::Access,
                },
            )
            .await
            .unwrap();

        let refreshed = svc
            .refresh(RefreshParams {
                refresh_token: issued.refresh_token.unwrap(),
                domain_id: Some("d1".into()),
            })
            .await
            .unwrap();

        let principal = svc.identify(&refreshed.access_token).await.unwrap();
        assert_eq!(principal.subject, subject::encode("d1", "u1"));
    }

    #[tokio::test]
    async fn revoke_then_identify_is_rejected() {
        let svc = service().await;
        let issued = svc
            .issue(
                None,
                IssueParams {
                    user_id: "u1".into(),
                    domain_id: None,
                    r#type: KeyType::Access,
                },
            )
            .await
            .unwrap();
        let api = svc
            .create_api_key(&issued.access_token, CreateApiKeyParams {
                subject: None,
                duration_secs: Some(600),
            })
            .await
            .unwrap();

        svc.revoke(&issued.access_token, api.id.parse().unwrap())
            .await
            .unwrap();

        assert!(matches!(
            svc.identify(&api.access_token).await,
            Err(ErrorKind::AuthenticationError(_))
        ));
    }
}
