pub mod errors;
pub mod lifecycle;
pub mod locks;
pub mod overview;
pub mod payments;
pub mod session;

pub use errors::{DeactivateError, LifecycleError, ProvisionError};
pub use lifecycle::{
    AccountedTraffic, DeactivateOutcome, DeactivationReason, LifecycleManager, PeerHandle,
    ProvisionRequest, QuotaUpdate, ReconcileSummary, RestoreSummary, TrafficOutcome,
};
pub use locks::{PeerGuard, PeerLocks};
pub use overview::PeerOverview;
pub use payments::{PaymentOutcome, PaymentSucceeded};
pub use session::{AdminSession, SessionError};
