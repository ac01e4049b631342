pub mod dispatch;
pub mod notifier;
pub mod throttle;
pub mod types;

#[cfg(test)]
mod tests;

pub use dispatch::{AlertDispatcher, AlertRequest};
pub use notifier::{DeliveryTally, HttpNotifier, LogNotifier, Notifier};
pub use throttle::AlertThrottle;
pub use types::{AlertCategory, AlertEvent, AlertPayload, DeliveryStatus, StakeholderGroup};
