//! Best-effort delivery of domain events to the external ports.
//!
//! # Responsibility
//! - Re-read current meeting state per event and call the matching port.
//! - Absorb port failures: log, count, move on.
//!
//! # Invariants
//! - Dispatch never returns an error; the caller's transition is already
//!   committed by the time events are delivered.
//! - A calendar update without a stored external id degrades to a create.

use crate::model::meeting::{Meeting, MeetingId};
use crate::repo::meeting_repo::MeetingRepository;
use crate::sync::{BillingLedger, CalendarSync, DomainEvent, NotificationSink};
use log::{debug, warn};

/// Counts of how a dispatched batch fared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Fans domain events out to the calendar, ledger, and notification ports.
pub struct SyncDispatcher<'a, M: MeetingRepository> {
    meetings: M,
    calendar: &'a dyn CalendarSync,
    ledger: &'a dyn BillingLedger,
    notifications: &'a dyn NotificationSink,
}

impl<'a, M: MeetingRepository> SyncDispatcher<'a, M> {
    pub fn new(
        meetings: M,
        calendar: &'a dyn CalendarSync,
        ledger: &'a dyn BillingLedger,
        notifications: &'a dyn NotificationSink,
    ) -> Self {
        Self {
            meetings,
            calendar,
            ledger,
            notifications,
        }
    }

    /// Delivers a batch of events, in order.
    ///
    /// # Side effects
    /// - Stores external event ids produced by calendar creates.
    /// - Emits `sync_dispatch` logging events for failures.
    pub fn dispatch(&self, events: &[DomainEvent]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for event in events {
            match self.deliver(event) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Skipped(reason) => {
                    debug!("event=sync_dispatch module=sync status=skipped reason={reason}");
                    report.skipped += 1;
                }
                Delivery::Failed(reason) => {
                    warn!("event=sync_dispatch module=sync status=error error={reason}");
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn deliver(&self, event: &DomainEvent) -> Delivery {
        match event {
            DomainEvent::CalendarCreateRequested { meeting_id } => {
                self.with_meeting(*meeting_id, |meeting| self.calendar_create(meeting))
            }
            DomainEvent::CalendarUpdateRequested { meeting_id } => {
                self.with_meeting(*meeting_id, |meeting| match &meeting.external_event_id {
                    Some(event_id) => match self.calendar.update(meeting, event_id) {
                        Ok(()) => Delivery::Delivered,
                        Err(err) => Delivery::Failed(format!("calendar update: {err}")),
                    },
                    // No mirrored event yet; create one instead.
                    None => self.calendar_create(meeting),
                })
            }
            DomainEvent::CalendarDeleteRequested { meeting_id } => {
                self.with_meeting(*meeting_id, |meeting| {
                    let Some(event_id) = &meeting.external_event_id else {
                        return Delivery::Skipped("no external calendar event".to_string());
                    };
                    match self.calendar.delete(event_id) {
                        Ok(()) => match self.meetings.set_external_event_id(meeting.id, None) {
                            Ok(()) => Delivery::Delivered,
                            Err(err) => Delivery::Failed(format!("clear external event id: {err}")),
                        },
                        Err(err) => Delivery::Failed(format!("calendar delete: {err}")),
                    }
                })
            }
            DomainEvent::LedgerEntryCreateRequested { meeting_id } => {
                self.with_meeting(*meeting_id, |meeting| match meeting.scheduled_hours() {
                    Some(hours) => match self.ledger.create_entry(meeting, hours) {
                        Ok(()) => Delivery::Delivered,
                        Err(err) => Delivery::Failed(format!("ledger create: {err}")),
                    },
                    None => Delivery::Skipped("meeting is not scheduled".to_string()),
                })
            }
            DomainEvent::LedgerEntryUpdateRequested { meeting_id } => {
                self.with_meeting(*meeting_id, |meeting| match meeting.scheduled_hours() {
                    Some(hours) => match self.ledger.update_entry(meeting, hours) {
                        Ok(()) => Delivery::Delivered,
                        Err(err) => Delivery::Failed(format!("ledger update: {err}")),
                    },
                    None => Delivery::Skipped("meeting is not scheduled".to_string()),
                })
            }
            DomainEvent::LedgerEntryDeleteRequested { meeting_id } => {
                match self.ledger.delete_entry(*meeting_id) {
                    Ok(()) => Delivery::Delivered,
                    Err(err) => Delivery::Failed(format!("ledger delete: {err}")),
                }
            }
            DomainEvent::NotificationRequested(notification) => {
                match self.notifications.emit(notification) {
                    Ok(()) => Delivery::Delivered,
                    Err(err) => Delivery::Failed(format!("notification: {err}")),
                }
            }
        }
    }

    fn calendar_create(&self, meeting: &Meeting) -> Delivery {
        match self.calendar.create(meeting) {
            Ok(event_id) => {
                match self.meetings.set_external_event_id(meeting.id, Some(&event_id)) {
                    Ok(()) => Delivery::Delivered,
                    Err(err) => Delivery::Failed(format!("store external event id: {err}")),
                }
            }
            Err(err) => Delivery::Failed(format!("calendar create: {err}")),
        }
    }

    fn with_meeting(
        &self,
        meeting_id: MeetingId,
        deliver: impl FnOnce(&Meeting) -> Delivery,
    ) -> Delivery {
        match self.meetings.get_meeting(meeting_id) {
            Ok(Some(meeting)) => deliver(&meeting),
            Ok(None) => Delivery::Skipped(format!("meeting {meeting_id} no longer exists")),
            Err(err) => Delivery::Failed(format!("load meeting {meeting_id}: {err}")),
        }
    }
}

enum Delivery {
    Delivered,
    Skipped(String),
    Failed(String),
}
