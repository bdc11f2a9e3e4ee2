//! Decision audit boundary. The authorizer hands every verdict to an
//! `AuditSink`; the default sink writes structured tracing events. Sinks must
//! never fail or block the request they describe.

use serde::Serialize;
use tracing::{info, warn};

/// One record per authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub method: String,
    pub path: String,
    pub client_ip: String,
    pub user_agent: String,
    pub has_app_token: bool,
    pub has_session_token: bool,
    pub allowed: bool,
    pub reason: &'static str,
    pub mechanism: &'static str,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, rec: &AuditRecord);
}

/// Default sink: allows at info, denies at warn. Bypass allows also log at
/// warn so a non-production shortcut can never be mistaken for a verified
/// request in later audits.
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, rec: &AuditRecord) {
        if rec.allowed && rec.mechanism != "bypass" {
            info!(
                target: "audit",
                method = %rec.method,
                path = %rec.path,
                client_ip = %rec.client_ip,
                mechanism = rec.mechanism,
                "authorized"
            );
        } else {
            warn!(
                target: "audit",
                method = %rec.method,
                path = %rec.path,
                client_ip = %rec.client_ip,
                user_agent = %rec.user_agent,
                has_app_token = rec.has_app_token,
                has_session_token = rec.has_session_token,
                allowed = rec.allowed,
                reason = rec.reason,
                mechanism = rec.mechanism,
                "authorization decision"
            );
        }
    }
}
