//! Activity-result dispatch: start another screen and await its result.
//!
//! ```ignore
//! let dispatcher = ActivityResultDispatcher::new(launcher, store.dispatcher(&session, context));
//! let result = main_loop.block_on(dispatcher.start_activity_for_result(intent, None))?;
//! if result.result_code.is_ok() { /* use result.data */ }
//! ```
//!
//! The host's result hook must forward to
//! [`ActivityResultDispatcher::on_activity_result`] (on the designated
//! context) or [`ActivityResultDispatcher::post_activity_result`] (from any
//! thread).

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dispatcher::{Delivery, Dispatcher};
use crate::error::Result;
use crate::key::{CorrelationKey, RequestCode};

/// Host collaborator that starts activities.
pub trait ActivityLauncher: Send + Sync + 'static {
    /// Request payload; hashed to derive a code when none is supplied.
    type Intent: Hash;
    /// Data returned alongside the result code.
    type Data: Send + 'static;

    /// Fire-and-forget. The host later reports the outcome under `code`,
    /// or never does.
    fn start_activity_for_result(&self, intent: &Self::Intent, code: RequestCode);
}

/// Result code reported by the started activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCode(pub i32);

impl ResultCode {
    pub const OK: Self = Self(-1);
    pub const CANCELED: Self = Self(0);
    /// Start of user-defined result codes.
    pub const FIRST_USER: Self = Self(1);

    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    #[must_use]
    pub fn is_canceled(self) -> bool {
        self == Self::CANCELED
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::OK => f.write_str("ok"),
            Self::CANCELED => f.write_str("canceled"),
            Self(code) => write!(f, "{code}"),
        }
    }
}

/// Outcome of one activity-result cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityResult<D> {
    pub request_code: RequestCode,
    pub result_code: ResultCode,
    pub data: Option<D>,
}

/// Dispatcher for the activity-result request kind.
pub struct ActivityResultDispatcher<L: ActivityLauncher> {
    launcher: Arc<L>,
    dispatcher: Dispatcher,
}

impl<L: ActivityLauncher> Clone for ActivityResultDispatcher<L> {
    fn clone(&self) -> Self {
        Self {
            launcher: Arc::clone(&self.launcher),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<L: ActivityLauncher> fmt::Debug for ActivityResultDispatcher<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityResultDispatcher")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl<L: ActivityLauncher> ActivityResultDispatcher<L> {
    #[must_use]
    pub fn new(launcher: Arc<L>, dispatcher: Dispatcher) -> Self {
        Self {
            launcher,
            dispatcher,
        }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Start an activity and wait for its result.
    ///
    /// `code` defaults to a hash of `intent`. Fails with
    /// [`crate::error::RegistryError::DuplicateKey`] without starting
    /// anything if the code is already in flight, and with
    /// [`crate::error::SlotError::Closed`] if the session is destroyed
    /// while waiting.
    pub async fn start_activity_for_result(
        &self,
        intent: L::Intent,
        code: Option<RequestCode>,
    ) -> Result<ActivityResult<L::Data>> {
        let code = code.unwrap_or_else(|| RequestCode::derive(&intent));
        let key = CorrelationKey::activity(code);
        self.dispatcher
            .dispatch(key, |_slot| {
                debug!(key = %key, "starting activity for result");
                self.launcher.start_activity_for_result(&intent, code);
                Ok(())
            })
            .await
    }

    /// Host result hook. Must run on the designated context.
    pub fn on_activity_result(
        &self,
        code: RequestCode,
        result_code: ResultCode,
        data: Option<L::Data>,
    ) -> Delivery {
        self.dispatcher
            .deliver(CorrelationKey::activity(code), move || ActivityResult {
                request_code: code,
                result_code,
                data,
            })
    }

    /// Thread-safe variant of [`Self::on_activity_result`]: hops onto the
    /// designated context first.
    pub fn post_activity_result(
        &self,
        code: RequestCode,
        result_code: ResultCode,
        data: Option<L::Data>,
    ) {
        let this = self.clone();
        self.dispatcher.post(move || {
            this.on_activity_result(code, result_code, data);
        });
    }
}
