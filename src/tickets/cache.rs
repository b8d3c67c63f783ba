//! Cache scopes for ticket resources.

use crate::cache::Scope;

use super::types::TicketFilter;

/// Logical name shared by every ticket list scope.
pub const TICKET_LIST: &str = "tickets";
/// Logical name of per-ticket detail scopes.
pub const TICKET_DETAIL: &str = "ticket";

/// Scope keys for ticket data.
#[derive(Clone, Debug)]
pub enum TicketScope<'a> {
  /// A filtered list of tickets
  List(&'a TicketFilter),
  /// A single ticket
  Detail { id: &'a str },
}

impl TicketScope<'_> {
  pub fn scope(&self) -> Scope {
    match self {
      Self::List(filter) => Scope::builder(TICKET_LIST)
        .param("status", filter.status.map(|s| s.as_str()))
        .param("assignee", filter.assignee.as_deref())
        .param("search", filter.search.as_deref().map(normalize_search))
        .build(),
      Self::Detail { id } => Scope::builder(TICKET_DETAIL).param("id", id).build(),
    }
  }
}

/// Canonical detail scope for a ticket id.
pub fn detail_scope(id: &str) -> Scope {
  TicketScope::Detail { id }.scope()
}

/// Canonical list scope for a filter.
pub fn list_scope(filter: &TicketFilter) -> Scope {
  TicketScope::List(filter).scope()
}

/// Normalize free-text search for consistent keys.
/// Trims whitespace and lowercases for case-insensitive matching.
fn normalize_search(search: &str) -> String {
  search.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tickets::TicketStatus;

  #[test]
  fn test_unfiltered_list_is_bare_name() {
    assert_eq!(list_scope(&TicketFilter::default()).as_str(), "tickets");
  }

  #[test]
  fn test_list_scope_is_canonical() {
    let filter = TicketFilter {
      status: Some(TicketStatus::Open),
      assignee: Some("u-1".to_string()),
      search: Some("  Printer ".to_string()),
    };
    assert_eq!(
      list_scope(&filter).as_str(),
      r#"tickets:assignee:"u-1"|search:"printer"|status:"open""#
    );
  }

  #[test]
  fn test_detail_scope() {
    let scope = detail_scope("abc");
    assert_eq!(scope.as_str(), r#"ticket:id:"abc""#);
    assert_eq!(scope.name(), TICKET_DETAIL);
  }
}
