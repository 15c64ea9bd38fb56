use serde::{Deserialize, Serialize};

pub const ACTION_COUNT: usize = 27;
pub const STATE_COUNT: usize = 27;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    Physical,
    Cognitive,
    Procedural,
    Communication,
}

impl ModuleType {
    pub fn all() -> &'static [ModuleType] {
        &[
            ModuleType::Physical,
            ModuleType::Cognitive,
            ModuleType::Procedural,
            ModuleType::Communication,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Physical => "physical",
            Self::Cognitive => "cognitive",
            Self::Procedural => "procedural",
            Self::Communication => "communication",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "physical" => Some(Self::Physical),
            "cognitive" => Some(Self::Cognitive),
            "procedural" => Some(Self::Procedural),
            "communication" => Some(Self::Communication),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkillCategory {
    EmergencyProcedures,
    SafetyProtocols,
    PatientAssessment,
    DecisionMaking,
    EquipmentHandling,
    Communication,
}

impl SkillCategory {
    pub fn all() -> &'static [SkillCategory] {
        &[
            SkillCategory::EmergencyProcedures,
            SkillCategory::SafetyProtocols,
            SkillCategory::PatientAssessment,
            SkillCategory::DecisionMaking,
            SkillCategory::EquipmentHandling,
            SkillCategory::Communication,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmergencyProcedures => "EMERGENCY_PROCEDURES",
            Self::SafetyProtocols => "SAFETY_PROTOCOLS",
            Self::PatientAssessment => "PATIENT_ASSESSMENT",
            Self::DecisionMaking => "DECISION_MAKING",
            Self::EquipmentHandling => "EQUIPMENT_HANDLING",
            Self::Communication => "COMMUNICATION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "EMERGENCY_PROCEDURES" => Some(Self::EmergencyProcedures),
            "SAFETY_PROTOCOLS" => Some(Self::SafetyProtocols),
            "PATIENT_ASSESSMENT" => Some(Self::PatientAssessment),
            "DECISION_MAKING" => Some(Self::DecisionMaking),
            "EQUIPMENT_HANDLING" => Some(Self::EquipmentHandling),
            "COMMUNICATION" => Some(Self::Communication),
            _ => None,
        }
    }

    /// Static weight used to rank knowledge gaps; emergency procedures rank highest.
    pub fn importance_weight(&self) -> f64 {
        match self {
            Self::EmergencyProcedures => 1.0,
            Self::SafetyProtocols => 0.9,
            Self::PatientAssessment => 0.8,
            Self::DecisionMaking => 0.8,
            Self::EquipmentHandling => 0.7,
            Self::Communication => 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    Low,
    Medium,
    High,
}

impl Level {
    pub fn all() -> &'static [Level] {
        &[Level::Low, Level::Medium, Level::High]
    }

    /// Cuts at 0.4 and 0.7. Non-finite input lands in `Low`.
    pub fn from_value(value: f64) -> Self {
        if !value.is_finite() || value < 0.4 {
            Self::Low
        } else if value < 0.7 {
            Self::Medium
        } else {
            Self::High
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(Self::Low),
            1 => Some(Self::Medium),
            2 => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyState {
    pub knowledge: Level,
    pub performance: Level,
    pub stress: Level,
}

impl PolicyState {
    pub fn new(knowledge: Level, performance: Level, stress: Level) -> Self {
        Self {
            knowledge,
            performance,
            stress,
        }
    }

    pub fn all() -> Vec<PolicyState> {
        let mut states = Vec::with_capacity(STATE_COUNT);
        for k in Level::all() {
            for p in Level::all() {
                for s in Level::all() {
                    states.push(PolicyState::new(*k, *p, *s));
                }
            }
        }
        states
    }

    pub fn key(&self) -> String {
        format!(
            "k{}_p{}_s{}",
            self.knowledge.index(),
            self.performance.index(),
            self.stress.index()
        )
    }

    pub fn parse_key(key: &str) -> Option<Self> {
        let mut parts = key.split('_');
        let mut level = |prefix: char| -> Option<Level> {
            let part = parts.next()?;
            let rest = part.strip_prefix(prefix)?;
            Level::from_index(rest.parse().ok()?)
        };
        let knowledge = level('k')?;
        let performance = level('p')?;
        let stress = level('s')?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(knowledge, performance, stress))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum DifficultyDelta {
    Decrease,
    Hold,
    Increase,
}

impl DifficultyDelta {
    pub fn all() -> &'static [DifficultyDelta] {
        &[
            DifficultyDelta::Decrease,
            DifficultyDelta::Hold,
            DifficultyDelta::Increase,
        ]
    }

    pub fn value(&self) -> i8 {
        match self {
            Self::Decrease => -1,
            Self::Hold => 0,
            Self::Increase => 1,
        }
    }
}

impl TryFrom<i8> for DifficultyDelta {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::Decrease),
            0 => Ok(Self::Hold),
            1 => Ok(Self::Increase),
            other => Err(format!("difficulty delta out of range: {other}")),
        }
    }
}

impl From<DifficultyDelta> for i8 {
    fn from(delta: DifficultyDelta) -> Self {
        delta.value()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentType {
    Theory,
    Simulation,
    Practical,
}

impl ContentType {
    pub fn all() -> &'static [ContentType] {
        &[ContentType::Theory, ContentType::Simulation, ContentType::Practical]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Theory => "THEORY",
            Self::Simulation => "SIMULATION",
            Self::Practical => "PRACTICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "THEORY" => Some(Self::Theory),
            "SIMULATION" => Some(Self::Simulation),
            "PRACTICAL" => Some(Self::Practical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupportLevel {
    Guided,
    SemiAutonomous,
    Autonomous,
}

impl SupportLevel {
    pub fn all() -> &'static [SupportLevel] {
        &[
            SupportLevel::Guided,
            SupportLevel::SemiAutonomous,
            SupportLevel::Autonomous,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guided => "GUIDED",
            Self::SemiAutonomous => "SEMI_AUTONOMOUS",
            Self::Autonomous => "AUTONOMOUS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GUIDED" => Some(Self::Guided),
            "SEMI_AUTONOMOUS" => Some(Self::SemiAutonomous),
            "AUTONOMOUS" => Some(Self::Autonomous),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveAction {
    pub difficulty_delta: DifficultyDelta,
    pub content_type: ContentType,
    pub support_level: SupportLevel,
}

impl AdaptiveAction {
    pub fn new(
        difficulty_delta: DifficultyDelta,
        content_type: ContentType,
        support_level: SupportLevel,
    ) -> Self {
        Self {
            difficulty_delta,
            content_type,
            support_level,
        }
    }

    /// Enumeration order is difficulty-major, then content, then support.
    pub fn from_index(idx: usize) -> Option<Self> {
        if idx >= ACTION_COUNT {
            return None;
        }
        Some(Self::new(
            DifficultyDelta::all()[idx / 9],
            ContentType::all()[(idx / 3) % 3],
            SupportLevel::all()[idx % 3],
        ))
    }

    pub fn index(&self) -> usize {
        let d = match self.difficulty_delta {
            DifficultyDelta::Decrease => 0,
            DifficultyDelta::Hold => 1,
            DifficultyDelta::Increase => 2,
        };
        let c = match self.content_type {
            ContentType::Theory => 0,
            ContentType::Simulation => 1,
            ContentType::Practical => 2,
        };
        let s = match self.support_level {
            SupportLevel::Guided => 0,
            SupportLevel::SemiAutonomous => 1,
            SupportLevel::Autonomous => 2,
        };
        d * 9 + c * 3 + s
    }

    pub fn all() -> impl Iterator<Item = AdaptiveAction> {
        (0..ACTION_COUNT).filter_map(Self::from_index)
    }

    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.difficulty_delta.value(),
            self.content_type.as_str(),
            self.support_level.as_str()
        )
    }

    pub fn parse_key(key: &str) -> Option<Self> {
        let mut parts = key.split('|');
        let delta: i8 = parts.next()?.parse().ok()?;
        let content = ContentType::parse(parts.next()?)?;
        let support = SupportLevel::parse(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(
            DifficultyDelta::try_from(delta).ok()?,
            content,
            support,
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Biometrics {
    pub heart_rate: Option<f64>,
    pub skin_response: Option<f64>,
    pub focus_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub session_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: i64,
    #[serde(default)]
    pub skill_category: Option<String>,
    #[serde(default)]
    pub correct: Option<bool>,
    #[serde(default)]
    pub elapsed_ms: Option<f64>,
    #[serde(default)]
    pub interaction_count: Option<f64>,
    #[serde(default)]
    pub total_interactions: Option<f64>,
    #[serde(default)]
    pub biometrics: Option<Biometrics>,
    #[serde(default)]
    pub self_reported_confidence: Option<f64>,
}

impl TelemetryEvent {
    pub fn new(session_id: impl Into<String>, event_type: impl Into<String>, timestamp: i64) -> Self {
        Self {
            session_id: session_id.into(),
            event_type: event_type.into(),
            timestamp,
            skill_category: None,
            correct: None,
            elapsed_ms: None,
            interaction_count: None,
            total_interactions: None,
            biometrics: None,
            self_reported_confidence: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub accuracy: f64,
    pub completion_time: f64,
    pub attention_score: f64,
    pub confidence_level: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackType {
    AccuracyHint,
    BreakSuggestion,
    Encouragement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackMessage {
    #[serde(rename = "type")]
    pub feedback_type: FeedbackType,
    pub message: String,
    pub priority: FeedbackPriority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub metrics: SessionMetrics,
    pub feedback: Vec<FeedbackMessage>,
    pub adaptive_action: AdaptiveAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    Explicit,
    IdleTimeout,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MasteryLabel {
    Novice,
    Intermediate,
    Advanced,
    Expert,
}

impl MasteryLabel {
    pub fn from_probability(p: f64) -> Self {
        if p < 0.3 {
            Self::Novice
        } else if p < 0.6 {
            Self::Intermediate
        } else if p < 0.9 {
            Self::Advanced
        } else {
            Self::Expert
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillMastery {
    pub skill_category: SkillCategory,
    pub probability: f64,
    pub label: MasteryLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeGap {
    pub skill_category: SkillCategory,
    pub mastery: f64,
    pub priority_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub state: PolicyState,
    pub action: AdaptiveAction,
    pub next_state: PolicyState,
    pub reward: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: String,
    pub user_id: String,
    pub module_type: ModuleType,
    pub status: SessionStatus,
    pub close_reason: CloseReason,
    pub event_count: u64,
    pub opened_at: i64,
    pub closed_at: i64,
    pub mean_accuracy: f64,
    pub mean_attention: f64,
    pub mean_confidence: f64,
    pub mean_reward: Option<f64>,
    pub feedback_count: u64,
    pub last_action: Option<AdaptiveAction>,
    pub skills: Vec<SkillMastery>,
}
