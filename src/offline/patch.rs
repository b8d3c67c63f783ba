//! Optimistic patches: the local guess at what a write will produce.

use chrono::{DateTime, Utc};

use crate::tickets::{Ticket, TicketMutation, TicketStatus};

/// Apply `mutation` to `current` as if the server had accepted it.
///
/// `current` may already be optimistic; patches compose in issue order. The
/// result is tagged `pending_sync` with the mutation's kind.
pub fn apply_patch(current: &Ticket, mutation: &TicketMutation, now: DateTime<Utc>) -> Ticket {
  let mut ticket = current.clone();

  match mutation {
    TicketMutation::Update { changes, .. } => {
      if let Some(title) = &changes.title {
        ticket.title = title.clone();
      }
      if let Some(description) = &changes.description {
        ticket.description = Some(description.clone());
      }
      if let Some(priority) = &changes.priority {
        ticket.priority = Some(priority.clone());
      }
      if let Some(issue_type) = &changes.issue_type {
        ticket.issue_type = Some(issue_type.clone());
      }
      if let Some(attachments) = &changes.attachments {
        ticket.attachments = attachments.clone();
      }
      if let Some(status) = changes.status {
        set_status(&mut ticket, status, now);
      }
    }
    TicketMutation::Assign { assignee, .. } => {
      ticket.assignee = Some(assignee.clone());
      ticket.assignment_request = None;
      // Only the first assignment moves the ticket along
      if ticket.status == TicketStatus::Open {
        ticket.status = TicketStatus::InProgress;
      }
    }
    TicketMutation::Resolve { .. } => set_status(&mut ticket, TicketStatus::Resolved, now),
    TicketMutation::Create { draft, .. } => {
      ticket.title = draft.title.clone();
      ticket.description = draft.description.clone();
      ticket.priority = draft.priority.clone();
      ticket.issue_type = draft.issue_type.clone();
      ticket.status = TicketStatus::Open;
      ticket.created_at.get_or_insert(now);
    }
  }

  ticket.pending_sync = true;
  ticket.pending_action = Some(mutation.kind());
  ticket.updated_at = Some(now);
  ticket
}

fn set_status(ticket: &mut Ticket, status: TicketStatus, now: DateTime<Utc>) {
  match status {
    TicketStatus::Resolved | TicketStatus::Closed => {
      ticket.resolved_at.get_or_insert(now);
    }
    TicketStatus::Open | TicketStatus::InProgress => ticket.resolved_at = None,
  }
  ticket.status = status;
}
