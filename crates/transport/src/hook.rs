//! Task-scoped suspension of the authorization hook
//!
//! A token refresh is itself an HTTP request through the same transport. If
//! the hook ran for it, the registry would be asked for the header of the very
//! strategy that is refreshing. `without_auth` marks the wrapped future so the
//! transport skips the hook for requests it issues. The mark lives only as long
//! as the future, so it is dropped on success, error, panic and cancellation
//! alike, and other tasks keep their credentials meanwhile.

use std::future::Future;

tokio::task_local! {
    static AUTH_SUSPENDED: ();
}

/// Run `fut` with the authorization hook suspended.
pub async fn without_auth<F: Future>(fut: F) -> F::Output {
    AUTH_SUSPENDED.scope((), fut).await
}

/// Whether the current task is running inside `without_auth`.
pub fn auth_suspended() -> bool {
    AUTH_SUSPENDED.try_with(|_| ()).is_ok()
}
