//! Runtime-permission dispatch.
//!
//! Before prompting, the dispatcher asks the host which permissions are
//! already granted. If all are, the cycle resolves locally without any
//! prompt; otherwise only the missing subset is prompted, still correlated
//! under the single key derived from the whole requested set. The caller
//! always gets one verdict per requested permission, in request order.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dispatcher::{Delivery, Dispatcher};
use crate::error::{Error, Result};
use crate::key::{CorrelationKey, RequestCode};

/// Host collaborator for permission queries and prompts.
pub trait PermissionHost: Send + Sync + 'static {
    /// Current grant status, synchronously.
    fn check_permission(&self, permission: &str) -> GrantResult;

    /// Whether the host recommends explaining why `permission` is needed.
    fn should_show_rationale(&self, permission: &str) -> bool;

    /// Fire-and-forget prompt; the host reports back under `code`.
    fn request_permissions(&self, permissions: &[String], code: RequestCode);
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Grant status of one permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantResult {
    Granted,
    Denied,
}

impl GrantResult {
    /// Host integer status code for a granted permission.
    pub const RAW_GRANTED: i32 = 0;
    /// Host integer status code for a denied permission.
    pub const RAW_DENIED: i32 = -1;

    /// Map a host status code; anything but [`Self::RAW_GRANTED`] is denied.
    #[must_use]
    pub fn from_raw(raw: i32) -> Self {
        if raw == Self::RAW_GRANTED {
            Self::Granted
        } else {
            Self::Denied
        }
    }

    #[must_use]
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Granted => Self::RAW_GRANTED,
            Self::Denied => Self::RAW_DENIED,
        }
    }
}

/// Overall verdict of a [`PermissionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    /// Every requested permission is granted.
    Granted,
    /// At least one permission was denied.
    Denied,
    /// Denied, and the host recommends showing a rationale.
    ShowRationale,
}

impl fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => f.write_str("granted"),
            Self::Denied => f.write_str("denied"),
            Self::ShowRationale => f.write_str("show_rationale"),
        }
    }
}

/// Outcome of a permission request or status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResult {
    /// Requested permissions, in request order.
    pub permissions: Vec<String>,
    /// One grant result per entry of `permissions`.
    pub grant_results: Vec<GrantResult>,
    /// Permissions for which a rationale should be shown.
    pub rationale: Vec<String>,
}

impl PermissionResult {
    /// Result for a set that is already fully granted.
    #[must_use]
    pub fn all_granted(permissions: Vec<String>) -> Self {
        let grant_results = vec![GrantResult::Granted; permissions.len()];
        Self {
            permissions,
            grant_results,
            rationale: Vec::new(),
        }
    }

    /// Rationale takes precedence, then any denial, else granted.
    #[must_use]
    pub fn status(&self) -> PermissionStatus {
        if !self.rationale.is_empty() {
            PermissionStatus::ShowRationale
        } else if self.grant_results.iter().any(|r| *r != GrantResult::Granted) {
            PermissionStatus::Denied
        } else {
            PermissionStatus::Granted
        }
    }

    #[must_use]
    pub fn is_granted(&self) -> bool {
        self.status() == PermissionStatus::Granted
    }

    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.status() == PermissionStatus::Denied
    }

    /// Grant result for `permission`, if it was part of this result.
    #[must_use]
    pub fn grant_for(&self, permission: &str) -> Option<GrantResult> {
        self.permissions
            .iter()
            .position(|p| p == permission)
            .and_then(|i| self.grant_results.get(i).copied())
    }

    /// Fold a prompt outcome for a subset back into the full request.
    ///
    /// Permissions the prompt did not report are granted if they were
    /// granted before prompting and denied otherwise.
    fn merge(requested: &[String], pre_granted: &[String], prompted: &Self) -> Self {
        let grant_results = requested
            .iter()
            .map(|permission| {
                prompted.grant_for(permission).unwrap_or_else(|| {
                    if pre_granted.contains(permission) {
                        GrantResult::Granted
                    } else {
                        GrantResult::Denied
                    }
                })
            })
            .collect();
        let rationale = prompted
            .rationale
            .iter()
            .filter(|p| requested.contains(p))
            .cloned()
            .collect();
        Self {
            permissions: requested.to_vec(),
            grant_results,
            rationale,
        }
    }
}

/// Code for a permission set; independent of order and duplicates.
#[must_use]
pub fn permission_request_code(permissions: &[String]) -> RequestCode {
    let set: BTreeSet<&str> = permissions.iter().map(String::as_str).collect();
    RequestCode::derive(&set)
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Dispatcher for the permission-request kind.
pub struct PermissionDispatcher<H: PermissionHost> {
    host: Arc<H>,
    dispatcher: Dispatcher,
}

impl<H: PermissionHost> Clone for PermissionDispatcher<H> {
    fn clone(&self) -> Self {
        Self {
            host: Arc::clone(&self.host),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<H: PermissionHost> fmt::Debug for PermissionDispatcher<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionDispatcher")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl<H: PermissionHost> PermissionDispatcher<H> {
    #[must_use]
    pub fn new(host: Arc<H>, dispatcher: Dispatcher) -> Self {
        Self { host, dispatcher }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Request `permissions`, prompting only for those not yet granted.
    ///
    /// The result lists the permissions exactly as requested, duplicates
    /// included; the host is prompted once per distinct permission. An
    /// empty request is rejected with [`Error::InvalidArgument`].
    pub async fn request_permissions<I>(&self, permissions: I) -> Result<PermissionResult>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.dispatcher.context().assert_current("permission request");
        let requested: Vec<String> = permissions.into_iter().map(Into::into).collect();
        if requested.is_empty() {
            return Err(Error::InvalidArgument(
                "no permissions requested".to_string(),
            ));
        }

        let code = permission_request_code(&requested);
        let key = CorrelationKey::permission(code);

        let mut distinct: Vec<String> = Vec::with_capacity(requested.len());
        for permission in &requested {
            if !distinct.contains(permission) {
                distinct.push(permission.clone());
            }
        }
        let (pre_granted, missing): (Vec<String>, Vec<String>) = distinct
            .into_iter()
            .partition(|p| self.host.check_permission(p) == GrantResult::Granted);

        let prompted = self
            .dispatcher
            .dispatch(key, |slot| {
                if missing.is_empty() {
                    debug!(key = %key, "all permissions already granted");
                    slot.send(PermissionResult::all_granted(requested.clone()))?;
                } else {
                    debug!(key = %key, missing = ?missing, "prompting for permissions");
                    self.host.request_permissions(&missing, code);
                }
                Ok(())
            })
            .await?;

        Ok(PermissionResult::merge(&requested, &pre_granted, &prompted))
    }

    /// Host prompt hook. Must run on the designated context.
    ///
    /// Missing grant entries (an interrupted prompt) count as denied.
    pub fn on_request_permissions_result(
        &self,
        code: RequestCode,
        permissions: &[String],
        grant_results: &[GrantResult],
    ) -> Delivery {
        self.dispatcher
            .deliver(CorrelationKey::permission(code), || PermissionResult {
                permissions: permissions.to_vec(),
                grant_results: permissions
                    .iter()
                    .enumerate()
                    .map(|(i, _)| grant_results.get(i).copied().unwrap_or(GrantResult::Denied))
                    .collect(),
                rationale: permissions
                    .iter()
                    .filter(|p| self.host.should_show_rationale(p))
                    .cloned()
                    .collect(),
            })
    }

    /// Thread-safe variant of [`Self::on_request_permissions_result`].
    pub fn post_request_permissions_result(
        &self,
        code: RequestCode,
        permissions: Vec<String>,
        grant_results: Vec<GrantResult>,
    ) {
        let this = self.clone();
        self.dispatcher.post(move || {
            this.on_request_permissions_result(code, &permissions, &grant_results);
        });
    }

    /// Current status of `permissions` without prompting.
    pub fn permission_status<I>(&self, permissions: I) -> PermissionResult
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let permissions: Vec<String> = permissions.into_iter().map(Into::into).collect();
        let grant_results = permissions
            .iter()
            .map(|p| self.host.check_permission(p))
            .collect();
        let rationale = permissions
            .iter()
            .filter(|p| self.host.should_show_rationale(p))
            .cloned()
            .collect();
        PermissionResult {
            permissions,
            grant_results,
            rationale,
        }
    }
}
