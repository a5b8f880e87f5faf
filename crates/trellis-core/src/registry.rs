//! Schema registry: type code to configuration for every object and edge type.
//!
//! A [`Schema`] is built once at startup with [`SchemaBuilder`], validated,
//! and then shared read-only (typically as `Arc<Schema>`).

use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use crate::entity::{Edge, Object, Operation};
use crate::error::{ErrorContext, Result, TrellisError};
use crate::fieldtype::FieldType;
use crate::policy::{EdgePolicy, ObjectPolicy};
use crate::rules::{Privacy, RuleList};
use crate::types::{TypeCode, IDENTITY_EDGE, IDENTITY_SUBJECT_FIELD, MAX_APP_TYPE, ROOT_TYPE};

// ── Field privacy ─────────────────────────────────────────────────

/// How one payload field is gated for one operation.
#[derive(Debug, Clone, Default)]
pub enum FieldAccess {
    #[default]
    Allow,
    /// Same answer as the entity-level check.
    Entity,
    Rules(RuleList<Object>),
}

#[derive(Debug, Clone, Default)]
pub struct FieldPrivacy {
    pub cansee: FieldAccess,
    pub cancreate: FieldAccess,
    pub canmodify: FieldAccess,
}

impl FieldPrivacy {
    pub fn access(&self, op: Operation) -> &FieldAccess {
        match op {
            Operation::See => &self.cansee,
            Operation::Create => &self.cancreate,
            Operation::Modify => &self.canmodify,
        }
    }

    pub fn see(mut self, access: FieldAccess) -> Self {
        self.cansee = access;
        self
    }

    pub fn create(mut self, access: FieldAccess) -> Self {
        self.cancreate = access;
        self
    }

    pub fn modify(mut self, access: FieldAccess) -> Self {
        self.canmodify = access;
        self
    }
}

// ── Index declarations ────────────────────────────────────────────

/// A time-indexed value: a payload date field or a row timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeField {
    Data(String),
    Created,
    Updated,
}

impl TimeField {
    /// Name stored in the `field` column of the time index.
    pub fn storage_name(&self) -> &str {
        match self {
            TimeField::Data(name) => name,
            TimeField::Created => "object.time_created",
            TimeField::Updated => "object.time_updated",
        }
    }
}

/// Full-text index over the concatenation of `fields`, searchable as `index_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextIndex {
    pub index_type: TypeCode,
    pub fields: Vec<String>,
}

// ── Object types ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ObjectTypeConfig {
    pub name: String,
    pub privacy: Privacy<Object>,
    pub field_privacy: HashMap<String, FieldPrivacy>,
    pub fields: BTreeMap<String, FieldType>,
    /// Reject payload keys not declared in `fields`.
    pub strict_types: bool,
    pub index: Vec<String>,
    pub unique_index: Vec<String>,
    pub time_index: Vec<TimeField>,
    pub geo_index: Option<String>,
    pub text_index: Vec<TextIndex>,
    /// Root object every instance is linked from.
    pub root_id: Option<Uuid>,
    /// Fields that a modify always carries over from the stored row.
    pub preserved_fields: Vec<String>,
}

impl ObjectTypeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            privacy: Privacy::deny_all(),
            field_privacy: HashMap::new(),
            fields: BTreeMap::new(),
            strict_types: false,
            index: Vec::new(),
            unique_index: Vec::new(),
            time_index: Vec::new(),
            geo_index: None,
            text_index: Vec::new(),
            root_id: None,
            preserved_fields: Vec::new(),
        }
    }

    pub fn policy(self, policy: ObjectPolicy) -> Self {
        self.privacy(policy.privacy())
    }

    pub fn privacy(mut self, privacy: Privacy<Object>) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict_types = true;
        self
    }

    pub fn field_privacy(mut self, name: impl Into<String>, privacy: FieldPrivacy) -> Self {
        self.field_privacy.insert(name.into(), privacy);
        self
    }

    pub fn index(mut self, field: impl Into<String>) -> Self {
        self.index.push(field.into());
        self
    }

    pub fn unique_index(mut self, field: impl Into<String>) -> Self {
        self.unique_index.push(field.into());
        self
    }

    pub fn time_index(mut self, field: TimeField) -> Self {
        self.time_index.push(field);
        self
    }

    pub fn geo_index(mut self, field: impl Into<String>) -> Self {
        self.geo_index = Some(field.into());
        self
    }

    pub fn text_index<S: Into<String>>(
        mut self,
        index_type: TypeCode,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.text_index.push(TextIndex {
            index_type,
            fields: fields.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn root(mut self, root_id: Uuid) -> Self {
        self.root_id = Some(root_id);
        self
    }

    pub fn preserve(mut self, field: impl Into<String>) -> Self {
        self.preserved_fields.push(field.into());
        self
    }

    pub fn field_access(&self, key: &str, op: Operation) -> &FieldAccess {
        static ALLOW: FieldAccess = FieldAccess::Allow;
        self.field_privacy
            .get(key)
            .map_or(&ALLOW, |privacy| privacy.access(op))
    }

    pub fn is_preserved(&self, key: &str) -> bool {
        key == IDENTITY_SUBJECT_FIELD || self.preserved_fields.iter().any(|f| f == key)
    }
}

// ── Edge types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReverseEdge {
    /// The edge type is its own reverse.
    SelfReverse,
    Type(TypeCode),
}

#[derive(Debug, Clone)]
pub struct EdgeTypeConfig {
    pub name: String,
    pub privacy: Privacy<Edge>,
    /// Allowed source object types; empty means any.
    pub from_types: Vec<TypeCode>,
    /// Allowed destination object types; empty means any.
    pub to_types: Vec<TypeCode>,
    pub reverse: Option<ReverseEdge>,
}

impl EdgeTypeConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            privacy: Privacy::deny_all(),
            from_types: Vec::new(),
            to_types: Vec::new(),
            reverse: None,
        }
    }

    pub fn policy(self, policy: EdgePolicy) -> Self {
        self.privacy(policy.privacy())
    }

    pub fn privacy(mut self, privacy: Privacy<Edge>) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn from_types(mut self, types: impl Into<Vec<TypeCode>>) -> Self {
        self.from_types = types.into();
        self
    }

    pub fn to_types(mut self, types: impl Into<Vec<TypeCode>>) -> Self {
        self.to_types = types.into();
        self
    }

    pub fn reverse(mut self, reverse_type: TypeCode) -> Self {
        self.reverse = Some(ReverseEdge::Type(reverse_type));
        self
    }

    pub fn symmetric(mut self) -> Self {
        self.reverse = Some(ReverseEdge::SelfReverse);
        self
    }
}

// ── Schema ────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Schema {
    objects: HashMap<TypeCode, ObjectTypeConfig>,
    edges: HashMap<TypeCode, EdgeTypeConfig>,
    object_codes: HashMap<String, TypeCode>,
    edge_codes: HashMap<String, TypeCode>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn object(&self, code: TypeCode) -> Result<&ObjectTypeConfig> {
        self.objects.get(&code).ok_or_else(|| TrellisError::Validation {
            message: "Invalid or unknown object type".to_string(),
            context: ErrorContext::new().with("type", code),
        })
    }

    pub fn edge(&self, code: TypeCode) -> Result<&EdgeTypeConfig> {
        self.edges.get(&code).ok_or_else(|| TrellisError::Validation {
            message: "Invalid or unknown edge type".to_string(),
            context: ErrorContext::new().with("type", code),
        })
    }

    pub fn has_object(&self, code: TypeCode) -> bool {
        self.objects.contains_key(&code)
    }

    pub fn has_edge(&self, code: TypeCode) -> bool {
        self.edges.contains_key(&code)
    }

    pub fn object_code(&self, name: &str) -> Option<TypeCode> {
        self.object_codes.get(name).copied()
    }

    pub fn edge_code(&self, name: &str) -> Option<TypeCode> {
        self.edge_codes.get(name).copied()
    }

    pub fn object_name(&self, code: TypeCode) -> Option<&str> {
        self.objects.get(&code).map(|c| c.name.as_str())
    }

    pub fn edge_name(&self, code: TypeCode) -> Option<&str> {
        self.edges.get(&code).map(|c| c.name.as_str())
    }

    /// The mirror type written alongside `code`, if it has one.
    pub fn reverse_edge_type(&self, code: TypeCode) -> Result<Option<TypeCode>> {
        Ok(match self.edge(code)?.reverse {
            Some(ReverseEdge::SelfReverse) => Some(code),
            Some(ReverseEdge::Type(reverse)) => Some(reverse),
            None => None,
        })
    }

    pub fn object_types(&self) -> impl Iterator<Item = (TypeCode, &ObjectTypeConfig)> {
        self.objects.iter().map(|(code, config)| (*code, config))
    }
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    objects: Vec<(TypeCode, ObjectTypeConfig)>,
    edges: Vec<(TypeCode, EdgeTypeConfig)>,
}

impl SchemaBuilder {
    pub fn object(mut self, code: TypeCode, config: ObjectTypeConfig) -> Self {
        self.objects.push((code, config));
        self
    }

    pub fn edge(mut self, code: TypeCode, config: EdgeTypeConfig) -> Self {
        self.edges.push((code, config));
        self
    }

    /// Validate the declarations and add the reserved root and identity types.
    pub fn build(self) -> Result<Schema> {
        let mut objects = HashMap::new();
        let mut object_codes = HashMap::new();
        for (code, config) in self.objects {
            reserve(code, &config.name, "object", &mut object_codes)?;
            objects.insert(code, config);
        }

        let mut edges = HashMap::new();
        let mut edge_codes = HashMap::new();
        for (code, config) in self.edges {
            reserve(code, &config.name, "edge", &mut edge_codes)?;
            edges.insert(code, config);
        }

        objects.insert(
            ROOT_TYPE,
            ObjectTypeConfig::new("root").policy(ObjectPolicy::Public),
        );
        object_codes.insert("root".to_string(), ROOT_TYPE);
        edges.insert(
            ROOT_TYPE,
            EdgeTypeConfig::new("root")
                .policy(EdgePolicy::Public)
                .from_types([ROOT_TYPE]),
        );
        edge_codes.insert("root".to_string(), ROOT_TYPE);
        edges.insert(IDENTITY_EDGE, EdgeTypeConfig::new("identity"));
        edge_codes.insert("identity".to_string(), IDENTITY_EDGE);

        link_reverse_pairs(&mut edges)?;

        for (code, config) in &edges {
            for t in config.from_types.iter().chain(&config.to_types) {
                if !objects.contains_key(t) {
                    return Err(TrellisError::validation(format!(
                        "Edge type {code} constrains endpoints to unknown object type {t}"
                    )));
                }
            }
        }

        Ok(Schema {
            objects,
            edges,
            object_codes,
            edge_codes,
        })
    }
}

fn reserve(
    code: TypeCode,
    name: &str,
    kind: &str,
    codes: &mut HashMap<String, TypeCode>,
) -> Result<()> {
    if code > MAX_APP_TYPE {
        return Err(TrellisError::Validation {
            message: format!("Type code is reserved for system {kind} types"),
            context: ErrorContext::new().with("type", code).with("name", name),
        });
    }
    if codes.values().any(|c| *c == code) {
        return Err(TrellisError::Validation {
            message: format!("Duplicate {kind} type code"),
            context: ErrorContext::new().with("type", code),
        });
    }
    if codes.insert(name.to_string(), code).is_some() {
        return Err(TrellisError::Validation {
            message: format!("Duplicate {kind} type name"),
            context: ErrorContext::new().with("name", name),
        });
    }
    Ok(())
}

/// Check every declared reverse and fill in the back-link on its counterpart.
fn link_reverse_pairs(edges: &mut HashMap<TypeCode, EdgeTypeConfig>) -> Result<()> {
    let declared: Vec<(TypeCode, TypeCode)> = edges
        .iter()
        .filter_map(|(code, config)| match config.reverse {
            Some(ReverseEdge::Type(reverse)) => Some((*code, reverse)),
            _ => None,
        })
        .collect();

    for (code, reverse) in declared {
        let Some(counterpart) = edges.get_mut(&reverse) else {
            return Err(TrellisError::Validation {
                message: "Reverse edge type is not registered".to_string(),
                context: ErrorContext::new()
                    .with("type", code)
                    .with("reverse", reverse),
            });
        };
        match counterpart.reverse {
            None => counterpart.reverse = Some(ReverseEdge::Type(code)),
            Some(ReverseEdge::Type(back)) if back == code => {}
            Some(ReverseEdge::SelfReverse) if reverse == code => {}
            Some(_) => {
                return Err(TrellisError::Validation {
                    message: "Reverse edge types must point at each other".to_string(),
                    context: ErrorContext::new()
                        .with("type", code)
                        .with("reverse", reverse),
                })
            }
        }
    }
    Ok(())
}
