//! Notification payloads for domain events.

use serde_json::json;

use super::models::{
    DomainEvent, IdeaStatusChangeNotification, NewEventNotification, NewIdeaNotification,
    NewLoanItemNotification, NotificationAction, NotificationPayload,
};

pub const TAG_NEW_IDEA: &str = "new-idea";
pub const TAG_NEW_EVENT: &str = "new-event";
pub const TAG_NEW_LOAN_ITEM: &str = "new-loan-item";
pub const TAG_IDEA_STATUS: &str = "idea-status";

fn view_action() -> NotificationAction {
    NotificationAction::new("view", "View")
}

pub fn new_idea_payload(idea: &NewIdeaNotification) -> NotificationPayload {
    NotificationPayload::new(
        "New idea proposed",
        format!("{} proposed \"{}\"", idea.proposed_by, idea.title),
    )
    .with_tag(TAG_NEW_IDEA)
    .with_data(json!({ "type": "new_idea", "url": "/ideas" }))
    .with_action(view_action())
}

pub fn new_event_payload(event: &NewEventNotification) -> NotificationPayload {
    let when = event.date.format("%Y-%m-%d %H:%M");
    let body = match &event.location {
        Some(location) if !location.trim().is_empty() => {
            format!("{} on {} at {}", event.title, when, location)
        }
        _ => format!("{} on {}", event.title, when),
    };
    NotificationPayload::new("New event", body)
        .with_tag(TAG_NEW_EVENT)
        .with_data(json!({
            "type": "new_event",
            "url": "/events",
            "date": event.date.to_rfc3339(),
        }))
        .with_action(view_action())
}

pub fn new_loan_item_payload(item: &NewLoanItemNotification) -> NotificationPayload {
    NotificationPayload::new(
        "New item available to borrow",
        format!("{} is lending \"{}\"", item.lender_name, item.title),
    )
    .with_tag(TAG_NEW_LOAN_ITEM)
    .with_data(json!({ "type": "new_loan_item", "url": "/loans" }))
    .with_action(view_action())
}

pub fn idea_status_change_payload(change: &IdeaStatusChangeNotification) -> NotificationPayload {
    NotificationPayload::new(
        "Idea status updated",
        format!(
            "\"{}\" by {} is now {}",
            change.title, change.proposed_by, change.status
        ),
    )
    .with_tag(TAG_IDEA_STATUS)
    .with_data(json!({
        "type": "idea_status_change",
        "url": "/ideas",
        "status": change.status,
    }))
    .with_action(view_action())
}

pub fn payload_for(event: &DomainEvent) -> NotificationPayload {
    match event {
        DomainEvent::NewIdea(idea) => new_idea_payload(idea),
        DomainEvent::NewEvent(event) => new_event_payload(event),
        DomainEvent::NewLoanItem(item) => new_loan_item_payload(item),
        DomainEvent::IdeaStatusChange(change) => idea_status_change_payload(change),
    }
}
