//! pulse-services: peer tracking, failure detection and the membership registry.

pub mod clock;
pub mod detector;
pub mod dispatch;
pub mod loopback;
pub mod membership;
pub mod peer;
pub mod registry;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use detector::{Detector, DetectorBuilder, DetectorError, SweepReport};
pub use dispatch::{MembershipListener, SubscriptionId};
pub use loopback::{LoopbackBus, LoopbackTransport};
pub use membership::{Membership, MembershipError};
pub use peer::{PeerRecord, PeerTable, Reconcile};
pub use registry::MembershipRegistry;
pub use transport::{ConnectionProbe, Transport};
