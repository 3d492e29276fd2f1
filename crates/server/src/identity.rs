//! Caller identity as forwarded by the upstream Identity Provider.
//!
//! Authentication itself happens upstream; this server trusts the
//! `x-user-id` / `x-tenant-id` headers the provider injects after
//! terminating auth. Permission checks use a static operation-to-scope
//! table rather than any per-request dispatch.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Agents pushing host/process/event reports.
    Report,
    /// Dashboards reading host, process, event, and config state.
    ReadState,
    /// Dashboards writing detection configuration.
    Configure,
}

/// Every API operation, with its required scope fixed at compile time.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    UpsertHost,
    ListHosts,
    GetHost,
    PushSnapshot,
    ListProcessesByMachine,
    AppendEvent,
    ListEvents,
    LatestEvent,
    ListEventsByMachine,
    UpsertDetectionConfig,
    ListDetectionConfigs,
    GetDetectionConfig,
    ListDetectionConfigsByMachine,
}

pub fn required_scope(op: Operation) -> Scope {
    match op {
        Operation::UpsertHost | Operation::PushSnapshot | Operation::AppendEvent => Scope::Report,
        Operation::ListHosts
        | Operation::GetHost
        | Operation::ListProcessesByMachine
        | Operation::ListEvents
        | Operation::LatestEvent
        | Operation::ListEventsByMachine
        | Operation::ListDetectionConfigs
        | Operation::GetDetectionConfig
        | Operation::ListDetectionConfigsByMachine => Scope::ReadState,
        Operation::UpsertDetectionConfig => Scope::Configure,
    }
}

#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub user_id: String,
    pub tenant_id: String,
    scopes: Vec<Scope>,
}

impl CallerIdentity {
    /// Check the static scope table for this operation. Insufficient scope
    /// is 403: it concerns the caller's own grants, not another tenant's
    /// data, so there is nothing to hide.
    pub fn require(&self, op: Operation) -> Result<(), Response> {
        let needed = required_scope(op);
        if self.scopes.contains(&needed) {
            Ok(())
        } else {
            Err((
                StatusCode::FORBIDDEN,
                Json(json!({
                    "success": false,
                    "error": format!("missing scope {:?}", needed),
                })),
            )
                .into_response())
        }
    }
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn parse_scopes(raw: &str) -> Vec<Scope> {
    raw.split(',')
        .filter_map(|s| match s.trim() {
            "report" => Some(Scope::Report),
            "read_state" => Some(Scope::ReadState),
            "configure" => Some(Scope::Configure),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_value(parts, "x-user-id").ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "success": false,
                    "error": "missing caller identity",
                })),
            )
                .into_response()
        })?;

        // Single-user accounts have no separate tenant; they are their own.
        let tenant_id = header_value(parts, "x-tenant-id").unwrap_or_else(|| user_id.clone());

        // No scopes header means the provider vouched for a fully trusted
        // caller (the deployment's own agents and dashboard). A header that
        // is present but empty is an explicit empty grant list, not trust.
        let scopes = match parts.headers.get("x-scopes") {
            Some(raw) => parse_scopes(raw.to_str().unwrap_or("")),
            None => vec![Scope::Report, Scope::ReadState, Scope::Configure],
        };

        Ok(CallerIdentity {
            user_id,
            tenant_id,
            scopes,
        })
    }
}
