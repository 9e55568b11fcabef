use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::model::{Answers, Predicate, StepId};

//
// ─── OPTIONS & FIELDS ──────────────────────────────────────────────────────────
//

/// One selectable answer on a choice step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDefinition {
    pub value: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl OptionDefinition {
    #[must_use]
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
            icon: None,
        }
    }

    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Text,
    Email,
    Tel,
}

/// An input on a form step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// When set and false, the field is hidden and exempt from every rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_when: Option<Predicate>,
}

impl FieldDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            label: None,
            visible_when: None,
        }
    }

    #[must_use]
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    #[must_use]
    pub fn email(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Email)
    }

    #[must_use]
    pub fn tel(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Tel)
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn visible_when(mut self, predicate: Predicate) -> Self {
        self.visible_when = Some(predicate);
        self
    }

    #[must_use]
    pub fn is_visible(&self, answers: &Answers) -> bool {
        self.visible_when
            .as_ref()
            .is_none_or(|predicate| predicate.evaluate(answers))
    }

    /// Label for display, falling back to the field name.
    #[must_use]
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

//
// ─── NEXT RULES ────────────────────────────────────────────────────────────────
//

/// Routes a step to its successor based on one answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRule {
    /// Field to branch on. Defaults to the owning choice step's field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<String>,
    pub routes: BTreeMap<String, StepId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<StepId>,
}

impl BranchRule {
    #[must_use]
    pub fn new(routes: impl IntoIterator<Item = (impl Into<String>, StepId)>) -> Self {
        Self {
            on: None,
            routes: routes.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            default: None,
        }
    }

    #[must_use]
    pub fn on(mut self, field: impl Into<String>) -> Self {
        self.on = Some(field.into());
        self
    }

    #[must_use]
    pub fn with_default(mut self, step: StepId) -> Self {
        self.default = Some(step);
        self
    }

    /// Target for the given answer value, falling back to `default`.
    #[must_use]
    pub fn route(&self, value: Option<&str>) -> Option<StepId> {
        value
            .and_then(|v| self.routes.get(v))
            .copied()
            .or(self.default)
    }
}

/// Successor computed from the full answer set.
///
/// Only constructible in code; quiz config files cannot express it.
#[derive(Clone)]
pub struct ComputedRule(Arc<dyn Fn(&Answers) -> StepId + Send + Sync>);

impl ComputedRule {
    pub fn resolve(&self, answers: &Answers) -> StepId {
        (self.0)(answers)
    }
}

impl fmt::Debug for ComputedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ComputedRule(..)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextRule {
    Fixed(StepId),
    Branch(BranchRule),
    #[serde(skip)]
    Computed(ComputedRule),
}

impl NextRule {
    #[must_use]
    pub fn fixed(step: StepId) -> Self {
        Self::Fixed(step)
    }

    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&Answers) -> StepId + Send + Sync + 'static,
    {
        Self::Computed(ComputedRule(Arc::new(f)))
    }

    /// Step ids this rule can statically reach.
    ///
    /// Computed rules report nothing; their targets are checked when resolved.
    #[must_use]
    pub fn static_targets(&self) -> Vec<StepId> {
        match self {
            NextRule::Fixed(id) => vec![*id],
            NextRule::Branch(branch) => branch
                .routes
                .values()
                .copied()
                .chain(branch.default)
                .collect(),
            NextRule::Computed(_) => Vec::new(),
        }
    }
}

//
// ─── STEPS ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// Single-click selection stored under `field`.
    Choice {
        field: String,
        options: Vec<OptionDefinition>,
    },
    Form {
        fields: Vec<FieldDefinition>,
    },
    Terminal,
}

/// One screen of a quiz.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: StepId,
    pub question: String,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<NextRule>,
}

impl StepDefinition {
    #[must_use]
    pub fn choice(
        id: StepId,
        question: impl Into<String>,
        field: impl Into<String>,
        options: Vec<OptionDefinition>,
    ) -> Self {
        Self {
            id,
            question: question.into(),
            kind: StepKind::Choice {
                field: field.into(),
                options,
            },
            next: None,
        }
    }

    #[must_use]
    pub fn form(id: StepId, question: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            id,
            question: question.into(),
            kind: StepKind::Form { fields },
            next: None,
        }
    }

    #[must_use]
    pub fn terminal(id: StepId, question: impl Into<String>) -> Self {
        Self {
            id,
            question: question.into(),
            kind: StepKind::Terminal,
            next: None,
        }
    }

    #[must_use]
    pub fn with_next(mut self, next: NextRule) -> Self {
        self.next = Some(next);
        self
    }

    #[must_use]
    pub fn is_choice(&self) -> bool {
        matches!(self.kind, StepKind::Choice { .. })
    }

    #[must_use]
    pub fn is_form(&self) -> bool {
        matches!(self.kind, StepKind::Form { .. })
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, StepKind::Terminal)
    }

    /// The category field of a choice step.
    #[must_use]
    pub fn choice_field(&self) -> Option<&str> {
        match &self.kind {
            StepKind::Choice { field, .. } => Some(field),
            _ => None,
        }
    }

    #[must_use]
    pub fn options(&self) -> &[OptionDefinition] {
        match &self.kind {
            StepKind::Choice { options, .. } => options,
            _ => &[],
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDefinition] {
        match &self.kind {
            StepKind::Form { fields } => fields,
            _ => &[],
        }
    }

    /// Names of every answer key this step writes.
    pub fn declared_fields(&self) -> impl Iterator<Item = &str> {
        self.choice_field()
            .into_iter()
            .chain(self.fields().iter().map(|f| f.name.as_str()))
    }
}
