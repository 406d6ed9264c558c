//! Scoped ownership of a device lease
//!
//! Every lease acquired here is released exactly once: explicitly through
//! [`LeaseGuard::release`], by [`with_lease`] after the protected work ends
//! however it ends, or in the background when a guard is dropped unreleased.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::{DeviceControlError, LeaseAcquisitionError, LeaseReleaseWarning};
use crate::lease::jmp::{ClientIdentity, DeviceControl, LeaseRequest};

/// Exclusive ownership of one device for a bounded duration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    pub lease_name: String,
    pub selector: String,
    pub duration: String,
    pub acquired_at: DateTime<Utc>,
}

/// Handle to a live lease
///
/// `release` consumes the guard, so a lease cannot be released twice.
pub struct LeaseGuard {
    control: Arc<dyn DeviceControl>,
    identity: ClientIdentity,
    lease: Lease,
    released: bool,
}

impl LeaseGuard {
    /// Acquire a lease; never retried
    pub async fn acquire(
        control: Arc<dyn DeviceControl>,
        request: &LeaseRequest,
    ) -> Result<Self, LeaseAcquisitionError> {
        info!("Acquiring lease for {} ({})", request.selector, request.duration);

        let lease_name = control
            .create_lease(request)
            .await
            .map_err(|source| LeaseAcquisitionError {
                selector: request.selector.clone(),
                source,
            })?;

        info!("Acquired lease {}", lease_name);
        Ok(Self {
            control,
            identity: request.client_identity.clone(),
            lease: Lease {
                lease_name,
                selector: request.selector.clone(),
                duration: request.duration.clone(),
                acquired_at: Utc::now(),
            },
            released: false,
        })
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    /// Extend the lease
    pub async fn renew(&self) -> Result<(), DeviceControlError> {
        self.control
            .renew_lease(&self.lease.lease_name, &self.identity)
            .await?;
        info!("Renewed lease {}", self.lease.lease_name);
        Ok(())
    }

    /// Release the lease
    ///
    /// A failure is returned as a warning: it must reach the operator but it
    /// never decides the outcome of the work done under the lease.
    pub async fn release(mut self) -> Result<(), LeaseReleaseWarning> {
        self.released = true;

        match self
            .control
            .delete_lease(&self.lease.lease_name, &self.identity)
            .await
        {
            Ok(()) => {
                info!("Released lease {}", self.lease.lease_name);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to release lease {}: {}", self.lease.lease_name, e);
                Err(LeaseReleaseWarning {
                    lease_name: self.lease.lease_name.clone(),
                    message: e.to_string(),
                })
            }
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let lease_name = self.lease.lease_name.clone();
        warn!("Lease {} dropped without release, releasing in background", lease_name);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let control = self.control.clone();
                let identity = self.identity.clone();
                handle.spawn(async move {
                    match control.delete_lease(&lease_name, &identity).await {
                        Ok(()) => info!("Released lease {}", lease_name),
                        Err(e) => error!("Failed to release lease {}: {}", lease_name, e),
                    }
                });
            }
            Err(_) => {
                error!("No runtime to release lease {}, it must be released manually", lease_name);
            }
        }
    }
}

/// How the protected work ended
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome<T> {
    Completed(T),

    /// Cancellation was requested and the work did not finish within the
    /// grace period
    Cancelled,
}

/// Result of work done under a lease
#[derive(Debug)]
pub struct Scoped<T> {
    pub lease: Lease,
    pub outcome: BlockOutcome<T>,
    pub release: Result<(), LeaseReleaseWarning>,
}

/// Run `block` while holding a lease, then release it
///
/// The block receives the cancellation token and should wind down when it
/// fires; it is given `grace` to do so before it is dropped. A panic in the
/// block is re-raised after the lease has been released. When acquisition
/// fails the block never runs and there is nothing to release.
pub async fn with_lease<T, F, Fut>(
    control: Arc<dyn DeviceControl>,
    request: &LeaseRequest,
    cancel: &CancellationToken,
    grace: Duration,
    block: F,
) -> Result<Scoped<T>, LeaseAcquisitionError>
where
    F: FnOnce(Lease, CancellationToken) -> Fut,
    Fut: Future<Output = T>,
{
    let guard = LeaseGuard::acquire(control, request).await?;
    let lease = guard.lease().clone();

    let work = AssertUnwindSafe(block(lease.clone(), cancel.clone())).catch_unwind();
    tokio::pin!(work);

    let finished = tokio::select! {
        biased;
        result = &mut work => Some(result),
        _ = cancel.cancelled() => None,
    };

    let finished = match finished {
        Some(result) => Some(result),
        None => {
            info!("Cancellation requested, waiting up to {:?} for the work under lease {}", grace, lease.lease_name);
            tokio::time::timeout(grace, &mut work).await.ok()
        }
    };

    if matches!(finished, Some(Err(_))) {
        error!("Work under lease {} panicked", lease.lease_name);
    }

    let release = guard.release().await;

    match finished {
        Some(Ok(output)) => Ok(Scoped {
            lease,
            outcome: BlockOutcome::Completed(output),
            release,
        }),
        Some(Err(panic)) => std::panic::resume_unwind(panic),
        None => Ok(Scoped {
            lease,
            outcome: BlockOutcome::Cancelled,
            release,
        }),
    }
}
