//! Per-endpoint authorization requirements and the verdict they produce.
//! Policies are composed declaratively by the route owner; the authorizer
//! never infers them from the path.

/// Requirement set for one endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Policy {
    pub require_app_token: bool,
    pub require_auth: bool,
    pub strict_mode: bool,
    pub log_request: bool,
}

impl Policy {
    /// No checks at all.
    pub fn public() -> Self {
        Self::default()
    }

    /// Frontend-identity token required (bypassable outside production).
    pub fn app_token() -> Self {
        Self { require_app_token: true, log_request: true, ..Self::default() }
    }

    /// App token plus the operator-auth check.
    pub fn full() -> Self {
        Self { require_app_token: true, require_auth: true, log_request: true, ..Self::default() }
    }

    /// Disable the non-production bypass for this endpoint.
    pub fn strict(mut self) -> Self {
        self.strict_mode = true;
        self
    }

    pub fn logged(mut self) -> Self {
        self.log_request = true;
        self
    }
}

/// Stable reason strings; downstream clients branch on these, so changing
/// them is a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonCode {
    Ok,
    InvalidAppToken,
    MissingAppToken,
    Unauthorized,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::Ok => "OK",
            ReasonCode::InvalidAppToken => "INVALID_APP_TOKEN",
            ReasonCode::MissingAppToken => "MISSING_APP_TOKEN",
            ReasonCode::Unauthorized => "UNAUTHORIZED",
        }
    }

    /// Client-facing error text. Deliberately generic for token failures so a
    /// stale token and a tampered token read the same to the caller.
    pub fn message(self) -> &'static str {
        match self {
            ReasonCode::Ok => "ok",
            ReasonCode::InvalidAppToken => "Invalid application token",
            ReasonCode::MissingAppToken => "Missing application token",
            ReasonCode::Unauthorized => "Unauthorized",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            ReasonCode::Ok => 200,
            ReasonCode::InvalidAppToken | ReasonCode::MissingAppToken => 403,
            ReasonCode::Unauthorized => 401,
        }
    }
}

/// Which trust mechanism satisfied (or would have satisfied) the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    Session,
    Token,
    Bypass,
    None,
}

impl Mechanism {
    pub fn as_str(self) -> &'static str {
        match self {
            Mechanism::Session => "session",
            Mechanism::Token => "token",
            Mechanism::Bypass => "bypass",
            Mechanism::None => "none",
        }
    }
}

/// Outcome of one authorization attempt. Ephemeral: consumed by the HTTP
/// layer and the audit sink, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: ReasonCode,
    pub mechanism: Mechanism,
}

impl Decision {
    pub fn allow(mechanism: Mechanism) -> Self {
        Self { allowed: true, reason: ReasonCode::Ok, mechanism }
    }

    pub fn deny(reason: ReasonCode) -> Self {
        Self { allowed: false, reason, mechanism: Mechanism::None }
    }
}
