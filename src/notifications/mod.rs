//! Push notifications: payloads, providers and the batched dispatcher

mod dispatcher;
mod models;
pub mod producers;
mod provider;
mod relay_provider;
mod service;

pub use dispatcher::{DispatchError, DispatchSettings, NotificationDispatcher};
pub use models::{
    DispatchResult, DomainEvent, IdeaStatusChangeNotification, NewEventNotification,
    NewIdeaNotification, NewLoanItemNotification, NotificationAction, NotificationPayload,
};
pub use provider::{NoOpPushProvider, PushOptions, PushProvider, PushTarget, SendOutcome, Urgency};
pub use relay_provider::{RelayPushProvider, VapidCredentials};
pub use service::{NotificationConfig, NotificationService};
