//! Session state owned by the action dispatcher.

use tracing::debug;

use crate::types::{ContactId, SessionEvent};

/// Contact list and active correspondent.
///
/// Only the dispatcher task holds a `SessionState`; everyone else sees it
/// through the snapshot events it emits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    contacts: Vec<ContactId>,
    current_contact: Option<ContactId>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contacts in server-reported order.
    pub fn contacts(&self) -> &[ContactId] {
        &self.contacts
    }

    pub fn current_contact(&self) -> Option<&ContactId> {
        self.current_contact.as_ref()
    }

    /// Overwrite the correspondent. The target need not be in the roster.
    pub fn set_correspondent(&mut self, target: ContactId) {
        debug!(
            target = %target,
            in_roster = self.contacts.contains(&target),
            "correspondent changed"
        );
        self.current_contact = Some(target);
    }

    /// Replace the whole contact list; stale entries are dropped.
    pub fn replace_contacts(&mut self, items: Vec<ContactId>) {
        debug!(
            previous = self.contacts.len(),
            next = items.len(),
            "replacing contact list"
        );
        self.contacts = items;
    }

    /// Immutable view handed to display code.
    pub fn snapshot(&self) -> SessionEvent {
        SessionEvent::ContactList {
            contacts: self.contacts.clone(),
            current: self.current_contact.clone(),
        }
    }
}
