//! Per-request authorization: composes the session store and the token codec
//! under a caller-supplied policy and returns a verdict. Single pass, no
//! retries, no cross-request state. The caller turns a deny into an HTTP
//! response; this layer never writes one.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::audit::{AuditRecord, AuditSink};
use crate::clock::Clock;
use crate::config::ConfigStore;

use super::policy::{Decision, Mechanism, Policy, ReasonCode};
use super::session::SessionStore;
use super::token;

// Header names consumed by the authorizer (case-insensitive per HTTP).
pub const HDR_APP_TOKEN: &str = "x-app-token";
pub const HDR_APP_TIMESTAMP: &str = "x-app-timestamp";
pub const HDR_SESSION_TOKEN: &str = "x-session-token";
pub const HDR_API_TOKEN: &str = "x-api-token";
pub const HDR_API_TIMESTAMP: &str = "x-api-timestamp";

/// Proxy headers scanned for the client address, in trust order. The first
/// value that parses as an IP address wins.
const CLIENT_IP_HEADERS: &[&str] = &["x-forwarded-for", "x-real-ip"];

/// Everything the authorizer needs from an inbound request, extracted by the
/// HTTP layer so this module stays framework-free.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub method: String,
    pub path: String,
    pub user_agent: String,
    pub app_token: Option<String>,
    pub app_timestamp: Option<String>,
    pub session_token: Option<String>,
    pub api_token: Option<String>,
    pub api_timestamp: Option<String>,
    /// Proxy address headers in arrival order, lowercased names.
    pub forwarded: Vec<(String, String)>,
    pub remote_addr: Option<String>,
}

impl RequestMeta {
    /// Best-effort client address from the trusted proxy header scan, falling
    /// back to the socket address, then "unknown".
    pub fn client_ip(&self) -> String {
        for name in CLIENT_IP_HEADERS {
            for (k, v) in &self.forwarded {
                if k != name {
                    continue;
                }
                // X-Forwarded-For may carry a chain; the left-most entry is
                // the original client.
                for part in v.split(',') {
                    let cand = part.trim();
                    if cand.parse::<IpAddr>().is_ok() {
                        return cand.to_string();
                    }
                }
            }
        }
        self.remote_addr.clone().unwrap_or_else(|| "unknown".to_string())
    }
}

pub struct RequestAuthorizer {
    config: Arc<ConfigStore>,
    sessions: SessionStore,
    audit: Arc<dyn AuditSink>,
    clock: Clock,
}

impl RequestAuthorizer {
    pub fn new(
        config: Arc<ConfigStore>,
        sessions: SessionStore,
        audit: Arc<dyn AuditSink>,
        clock: Clock,
    ) -> Self {
        Self { config, sessions, audit, clock }
    }

    /// Decide one request. Check order matters and is part of the contract:
    /// a valid session short-circuits the token checks entirely.
    pub fn authorize(&self, policy: Policy, meta: &RequestMeta) -> Decision {
        if policy.log_request {
            self.log_attempt(meta);
        }

        // 1) Session check: a presented, valid, unexpired session wins.
        if let Some(tok) = meta.session_token.as_deref() {
            if self.sessions.validate_token(tok).is_ok() {
                return self.finish(meta, Decision::allow(Mechanism::Session));
            }
        }

        // 2) App-token check.
        if policy.require_app_token {
            let cfg = self.config.load();
            if !cfg.environment.is_production() && !policy.strict_mode {
                // Loud on purpose: a silent bypass is a correctness hazard in
                // later audits.
                warn!(
                    target: "auth",
                    path = %meta.path,
                    env = "development",
                    "app token check bypassed outside production"
                );
                return self.finish(meta, Decision::allow(Mechanism::Bypass));
            }
            let now = self.clock.now();
            match (meta.app_token.as_deref(), meta.app_timestamp.as_deref()) {
                (Some(hash), Some(ts)) => {
                    let ok = token::validate_frontend_hash(
                        hash,
                        ts,
                        &meta.user_agent,
                        &cfg.app_secret,
                        &cfg.domain,
                        now,
                    );
                    if !ok {
                        return self.finish(meta, Decision::deny(ReasonCode::InvalidAppToken));
                    }
                }
                _ => {
                    // Legacy fallback: path-bound pair, only when no session
                    // was presented above.
                    match (meta.api_token.as_deref(), meta.api_timestamp.as_deref()) {
                        (Some(tok), Some(ts)) => {
                            let path = token::normalize_path("", &meta.path);
                            let ok = token::validate_path_token(
                                tok,
                                ts,
                                &path,
                                &cfg.api_secret,
                                token::PATH_TOKEN_MAX_AGE_SECS,
                                now,
                            );
                            if !ok {
                                return self
                                    .finish(meta, Decision::deny(ReasonCode::InvalidAppToken));
                            }
                        }
                        _ => {
                            return self.finish(meta, Decision::deny(ReasonCode::MissingAppToken));
                        }
                    }
                }
            }
            if !policy.require_auth {
                return self.finish(meta, Decision::allow(Mechanism::Token));
            }
        }

        // 3) Full-auth check: intentionally incomplete extension point. Real
        // operator-auth rules are unspecified; until they exist this allows.
        if policy.require_auth {
            let mech = if policy.require_app_token { Mechanism::Token } else { Mechanism::None };
            return self.finish(meta, Decision::allow(mech));
        }

        self.finish(meta, Decision::allow(Mechanism::None))
    }

    fn log_attempt(&self, meta: &RequestMeta) {
        info!(
            target: "auth",
            method = %meta.method,
            path = %meta.path,
            client_ip = %meta.client_ip(),
            user_agent = %meta.user_agent,
            has_app_token = meta.app_token.is_some(),
            has_session_token = meta.session_token.is_some(),
            "inbound request"
        );
    }

    /// Every decision is handed to the audit sink exactly once.
    fn finish(&self, meta: &RequestMeta, decision: Decision) -> Decision {
        self.audit.record(&AuditRecord {
            method: meta.method.clone(),
            path: meta.path.clone(),
            client_ip: meta.client_ip(),
            user_agent: meta.user_agent.clone(),
            has_app_token: meta.app_token.is_some(),
            has_session_token: meta.session_token.is_some(),
            allowed: decision.allowed,
            reason: decision.reason.as_str(),
            mechanism: decision.mechanism.as_str(),
        });
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ip_prefers_forwarded_for_then_real_ip() {
        let meta = RequestMeta {
            forwarded: vec![
                ("x-real-ip".to_string(), "10.0.0.2".to_string()),
                ("x-forwarded-for".to_string(), "203.0.113.7, 10.0.0.1".to_string()),
            ],
            remote_addr: Some("127.0.0.1".to_string()),
            ..Default::default()
        };
        assert_eq!(meta.client_ip(), "203.0.113.7");
    }

    #[test]
    fn client_ip_skips_garbage_values() {
        let meta = RequestMeta {
            forwarded: vec![
                ("x-forwarded-for".to_string(), "not-an-ip".to_string()),
                ("x-real-ip".to_string(), "2001:db8::1".to_string()),
            ],
            ..Default::default()
        };
        assert_eq!(meta.client_ip(), "2001:db8::1");
    }

    #[test]
    fn client_ip_falls_back_to_socket_then_unknown() {
        let meta = RequestMeta {
            remote_addr: Some("192.0.2.9".to_string()),
            ..Default::default()
        };
        assert_eq!(meta.client_ip(), "192.0.2.9");
        assert_eq!(RequestMeta::default().client_ip(), "unknown");
    }
}
