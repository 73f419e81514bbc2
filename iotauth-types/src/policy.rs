use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The closed set of entity kinds a policy tuple's subject or object can be
/// drawn from (§3 Data model — Policy Tuple).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityType {
    User,
    Thing,
    Group,
    Domain,
    Platform,
}

/// The closed set of relation labels usable as an edge in the tuple graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Relation {
    Administrator,
    Editor,
    Viewer,
    Member,
    Domain,
    ParentGroup,
    RoleGroup,
    Group,
    Platform,
}

/// The human-facing verbs callers pass as `PolicyReq::permission` (§4.4,
/// §4.5.7). The external engine maps each onto one or more relations
/// internally; `Permission::grants` gives the fallback lattice used by
/// [`crate::policy::Permission::grants`] and by the in-process fake engine
/// that stands in for that mapping in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Permission {
    Admin,
    Edit,
    View,
    Membership,
    Share,
    Platform,
}

impl Permission {
    /// Whether holding `relation` on an object satisfies this permission,
    /// per §4.5.7's relation→permission table (Administrator→Admin,
    /// Editor→Edit, Viewer→View, Member→Membership) generalized into a
    /// lattice so higher relations imply lower ones: an Administrator can do
    /// anything an Editor or Viewer can.
    #[must_use]
    pub fn grants(self, relation: Relation) -> bool {
        match self {
            Self::Admin => matches!(relation, Relation::Administrator),
            Self::Edit => matches!(relation, Relation::Administrator | Relation::Editor),
            Self::View => matches!(
                relation,
                Relation::Administrator | Relation::Editor | Relation::Viewer
            ),
            Self::Membership => matches!(
                relation,
                Relation::Administrator | Relation::Editor | Relation::Viewer | Relation::Member
            ),
            Self::Share => matches!(relation, Relation::Administrator),
            Self::Platform => matches!(relation, Relation::Platform),
        }
    }
}

/// §4.5.7's relation→permission mapping used to gate `AssignUsers`/
/// `UnassignUsers` on the permission that corresponds to the relation being
/// granted; relations outside the mapped set use their own name as the
/// permission ("else identity").
#[must_use]
pub fn permission_for_relation(relation: Relation) -> String {
    match relation {
        Relation::Administrator => Permission::Admin.to_string(),
        Relation::Editor => Permission::Edit.to_string(),
        Relation::Viewer => Permission::View.to_string(),
        Relation::Member => Permission::Membership.to_string(),
        other => other.to_string(),
    }
}

/// How `PolicyReq::subject` should be interpreted (§9 Open Questions:
/// `subject_kind` is a closed enum so an unrecognized encoding is rejected as
/// `MalformedEntity` before dispatch, rather than silently misread).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubjectKind {
    Token,
    Id,
}

/// A single relationship-graph edge: `(subjectType, subject, subjectRelation?,
/// relation, objectType, object)` (§3). Uniqueness is enforced on
/// `(subject, relation, object)` by the external engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyTuple {
    pub subject_type: EntityType,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subject_relation: Option<Relation>,
    pub relation: Relation,
    pub object_type: EntityType,
    pub object: String,
}

/// A request shape shared by `CheckPolicy`, `AddPolicy`/`DeletePolicy`, and
/// the `RetrieveObjects`/`RetrieveSubjects` family (§4.4). `permission` is the
/// human-facing verb (`"admin"`, `"edit"`, `"view"`, `"share"`, `"membership"`)
/// the engine maps onto one or more relations internally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyReq {
    pub subject_type: EntityType,
    pub subject_kind: SubjectKind,
    pub subject: String,
    pub permission: String,
    pub object_type: EntityType,
    pub object: String,
}

/// A local mirror row of a user↔domain tuple, kept for authoritative listing
/// without round-tripping the graph engine on every page request (§3, §4.3).
/// Never the source of truth for an authorization decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCopy {
    pub subject_type: EntityType,
    pub subject_id: String,
    pub relation: Relation,
    pub object_type: EntityType,
    pub object_id: String,
}

/// Hand-rolled rather than derived: `EntityType`/`Relation` are stored as
/// their `Display` text, not through an `sqlx::Type` impl.
impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for PolicyCopy {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;
        use std::str::FromStr;

        let subject_type: String = row.try_get("subject_type")?;
        let relation: String = row.try_get("relation")?;
        let object_type: String = row.try_get("object_type")?;
        Ok(Self {
            subject_type: EntityType::from_str(&subject_type).map_err(|e| {
                sqlx::Error::ColumnDecode {
                    index: "subject_type".into(),
                    source: Box::new(e),
                }
            })?,
            subject_id: row.try_get("subject_id")?,
            relation: Relation::from_str(&relation).map_err(|e| sqlx::Error::ColumnDecode {
                index: "relation".into(),
                source: Box::new(e),
            })?,
            object_type: EntityType::from_str(&object_type).map_err(|e| {
                sqlx::Error::ColumnDecode {
                    index: "object_type".into(),
                    source: Box::new(e),
                }
            })?,
            object_id: row.try_get("object_id")?,
        })
    }
}

impl PolicyCopy {
    #[must_use]
    pub fn new(
        subject_type: EntityType,
        subject_id: String,
        relation: Relation,
        object_type: EntityType,
        object_id: String,
    ) -> Self {
        Self {
            subject_type,
            subject_id,
            relation,
            object_type,
            object_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_grants_everything_below_it() {
        assert!(Permission::Admin.grants(Relation::Administrator));
        assert!(!Permission::Admin.grants(Relation::Editor));
        assert!(Permission::View.grants(Relation::Administrator));
        assert!(Permission::View.grants(Relation::Viewer));
        assert!(!Permission::View.grants(Relation::Member));
        assert!(Permission::Membership.grants(Relation::Member));
    }

    #[test]
    fn relation_to_permission_mapping() {
        assert_eq!(permission_for_relation(Relation::Administrator), "admin");
        assert_eq!(permission_for_relation(Relation::Editor), "edit");
        assert_eq!(permission_for_relation(Relation::Viewer), "view");
        assert_eq!(permission_for_relation(Relation::Member), "membership");
        assert_eq!(permission_for_relation(Relation::Group), "group");
    }

    #[test]
    fn entity_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&EntityType::Group).unwrap(),
            "\"group\""
        );
        assert_eq!(
            serde_json::to_string(&Relation::ParentGroup).unwrap(),
            "\"parent_group\""
        );
    }

    #[test]
    fn policy_tuple_round_trips() {
        let tuple = PolicyTuple {
            subject_type: EntityType::User,
            subject: "u1".into(),
            subject_relation: None,
            relation: Relation::Administrator,
            object_type: EntityType::Domain,
            object: "d1".into(),
        };
        let json = serde_json::to_string(&tuple).unwrap();
        let decoded: PolicyTuple = serde_json::from_str(&json).unwrap();
        assert_eq!(tuple, decoded);
    }

    #[test]
    fn subject_kind_round_trips() {
        let json = serde_json::to_string(&SubjectKind::Token).unwrap();
        assert_eq!(json, "\"token\"");
        assert_eq!(
            serde_json::from_str::<SubjectKind>(&json).unwrap(),
            SubjectKind::Token
        );
    }
}
