//! Assignment model - direct user→entity grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of direct grant.
///
/// All kinds propagate scope the same way; the type is recorded for the
/// calling CRUD layer and for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentType {
    Membership,
    LocationAssignment,
    ResponsiblePerson,
}

impl AssignmentType {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Membership => "membership",
            Self::LocationAssignment => "location_assignment",
            Self::ResponsiblePerson => "responsible_person",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "membership" => Some(Self::Membership),
            "location_assignment" => Some(Self::LocationAssignment),
            "responsible_person" => Some(Self::ResponsiblePerson),
            _ => None,
        }
    }
}

impl std::fmt::Display for AssignmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Assignment record. Never edited in place: a change revokes the old row and
/// inserts a new one pointing back through `supersedes_assignment_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub assignment_id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub entity_id: Uuid,
    pub assignment_type: AssignmentType,
    pub is_active: bool,
    pub assigned_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub assigned_by_user_id: Option<Uuid>,
    pub supersedes_assignment_id: Option<Uuid>,
}

impl Assignment {
    /// Create a new active assignment starting now.
    pub fn new(
        tenant_id: Uuid,
        user_id: Uuid,
        entity_id: Uuid,
        assignment_type: AssignmentType,
        assigned_by_user_id: Option<Uuid>,
    ) -> Self {
        Self {
            assignment_id: Uuid::new_v4(),
            tenant_id,
            user_id,
            entity_id,
            assignment_type,
            is_active: true,
            assigned_utc: Utc::now(),
            revoked_utc: None,
            assigned_by_user_id,
            supersedes_assignment_id: None,
        }
    }

    /// Replacement record for `self`, linked back to it.
    pub fn successor(
        &self,
        entity_id: Uuid,
        assignment_type: AssignmentType,
        assigned_by_user_id: Option<Uuid>,
    ) -> Self {
        Self {
            supersedes_assignment_id: Some(self.assignment_id),
            ..Self::new(
                self.tenant_id,
                self.user_id,
                entity_id,
                assignment_type,
                assigned_by_user_id,
            )
        }
    }

    /// Whether this record grants the same thing as the given triple.
    pub fn grants(&self, user_id: Uuid, entity_id: Uuid, assignment_type: AssignmentType) -> bool {
        self.is_active
            && self.user_id == user_id
            && self.entity_id == entity_id
            && self.assignment_type == assignment_type
    }
}

/// Input for creating an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAssignment {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub entity_id: Uuid,
    pub assignment_type: AssignmentType,
}

/// Changes carried by a superseding record. Unset fields keep the old value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupersedeAssignment {
    pub entity_id: Option<Uuid>,
    pub assignment_type: Option<AssignmentType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successor_links_back_and_keeps_user() {
        let old = Assignment::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            AssignmentType::Membership,
            None,
        );
        let new_entity = Uuid::new_v4();
        let admin = Uuid::new_v4();

        let next = old.successor(new_entity, AssignmentType::ResponsiblePerson, Some(admin));

        assert_ne!(next.assignment_id, old.assignment_id);
        assert_eq!(next.supersedes_assignment_id, Some(old.assignment_id));
        assert_eq!(next.user_id, old.user_id);
        assert_eq!(next.tenant_id, old.tenant_id);
        assert_eq!(next.entity_id, new_entity);
        assert!(next.is_active);
        assert_eq!(next.assigned_by_user_id, Some(admin));
    }

    #[test]
    fn test_grants_ignores_revoked_records() {
        let mut a = Assignment::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            AssignmentType::LocationAssignment,
            None,
        );
        assert!(a.grants(a.user_id, a.entity_id, AssignmentType::LocationAssignment));
        assert!(!a.grants(a.user_id, a.entity_id, AssignmentType::Membership));

        a.is_active = false;
        a.revoked_utc = Some(Utc::now());
        assert!(!a.grants(a.user_id, a.entity_id, AssignmentType::LocationAssignment));
    }

    #[test]
    fn test_assignment_type_serde_is_snake_case() {
        let json = serde_json::to_string(&AssignmentType::ResponsiblePerson).unwrap();
        assert_eq!(json, "\"responsible_person\"");
        assert_eq!(
            AssignmentType::parse("location_assignment"),
            Some(AssignmentType::LocationAssignment)
        );
    }
}
