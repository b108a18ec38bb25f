use conductor_core::{RiskLevel, UrgencyLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Dispatch priority. Lower value is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Priority {
    /// Served before everything else.
    Critical = 1,
    /// Served before routine work.
    High = 2,
    /// Routine work.
    Medium = 3,
    /// Housekeeping.
    Low = 4,
    /// Whenever nothing else is waiting.
    Background = 5,
}

impl Priority {
    /// Numeric level, 1 (most urgent) to 5.
    pub fn level(&self) -> u8 {
        *self as u8
    }

    /// Uppercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Background => "BACKGROUND",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the platform intends to do about a (risk, urgency) situation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Act right now.
    Immediate,
    /// Fix automatically.
    AutoFix,
    /// Tell a human.
    Notify,
    /// Just record it.
    Log,
}

impl From<ActionType> for Priority {
    fn from(action: ActionType) -> Self {
        match action {
            ActionType::Immediate => Priority::Critical,
            ActionType::AutoFix => Priority::High,
            ActionType::Notify => Priority::Medium,
            ActionType::Log => Priority::Low,
        }
    }
}

/// One cell of a decision table, as written in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRule {
    /// Risk level the rule applies to.
    pub risk: RiskLevel,
    /// Urgency level the rule applies to.
    pub urgency: UrgencyLevel,
    /// Resulting action.
    pub action: ActionType,
}

/// Lookup table from (risk, urgency) to [`ActionType`]. May be partial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionMatrix {
    rules: HashMap<(RiskLevel, UrgencyLevel), ActionType>,
}

impl Default for DecisionMatrix {
    fn default() -> Self {
        use ActionType::*;
        use RiskLevel as R;
        use UrgencyLevel as U;
        Self::from_rules([
            (R::Low, U::Low, Log),
            (R::Low, U::Medium, Log),
            (R::Low, U::High, Notify),
            (R::Medium, U::Low, Notify),
            (R::Medium, U::Medium, Notify),
            (R::Medium, U::High, AutoFix),
            (R::High, U::Low, Notify),
            (R::High, U::Medium, AutoFix),
            (R::High, U::High, Immediate),
        ])
    }
}

impl DecisionMatrix {
    /// Builds a table from explicit cells. Later cells override earlier ones.
    pub fn from_rules(
        rules: impl IntoIterator<Item = (RiskLevel, UrgencyLevel, ActionType)>,
    ) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|(risk, urgency, action)| ((risk, urgency), action))
                .collect(),
        }
    }

    /// Starts from the default table and applies `overrides` on top.
    pub fn with_overrides(overrides: &[DecisionRule]) -> Self {
        let mut matrix = Self::default();
        for rule in overrides {
            matrix.rules.insert((rule.risk, rule.urgency), rule.action);
        }
        matrix
    }

    /// The action for a cell, if the table has one.
    pub fn action_for(&self, risk: RiskLevel, urgency: UrgencyLevel) -> Option<ActionType> {
        self.rules.get(&(risk, urgency)).copied()
    }
}

/// Maps (risk, urgency) to a [`Priority`] through a [`DecisionMatrix`].
#[derive(Debug, Clone, Default)]
pub struct PriorityClassifier {
    matrix: DecisionMatrix,
}

impl PriorityClassifier {
    /// Classifier backed by `matrix`.
    pub fn new(matrix: DecisionMatrix) -> Self {
        Self { matrix }
    }

    /// Priority for a submission; [`Priority::Medium`] when the table has no cell for it.
    pub fn classify(&self, risk: RiskLevel, urgency: UrgencyLevel) -> Priority {
        self.matrix
            .action_for(risk, urgency)
            .map_or(Priority::Medium, Priority::from)
    }
}
