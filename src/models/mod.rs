use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type RaterId = i64;
pub type ItemId = i64;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    /// `None` for anonymous reviews, which never enter the rating matrix.
    pub rater_id: Option<RaterId>,
    pub item_id: ItemId,
    pub score: u8,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}

impl Rating {
    pub fn new(rater_id: RaterId, item_id: ItemId, score: u8) -> Self {
        Self {
            rater_id: Some(rater_id),
            item_id,
            score,
            approved: false,
            created_at: Utc::now(),
        }
    }

    pub fn anonymous(item_id: ItemId, score: u8) -> Self {
        Self {
            rater_id: None,
            item_id,
            score,
            approved: false,
            created_at: Utc::now(),
        }
    }

    pub fn approved(mut self) -> Self {
        self.approved = true;
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn is_in_range(&self) -> bool {
        (MIN_RATING..=MAX_RATING).contains(&self.score)
    }

    pub fn enters_matrix(&self) -> bool {
        self.approved && self.rater_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Active,
    Inactive,
    OutOfStock,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Active => "active",
            ItemStatus::Inactive => "inactive",
            ItemStatus::OutOfStock => "out_of_stock",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ItemStatus::Active),
            "inactive" => Ok(ItemStatus::Inactive),
            "out_of_stock" => Ok(ItemStatus::OutOfStock),
            other => Err(format!("unknown item status: {}", other)),
        }
    }
}

/// Catalog entry. The metadata fields feed the content-based and goal-based scorers only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub category: String,
    pub supplement_type: String,
    pub goals: Vec<String>,
    pub status: ItemStatus,
}

impl Item {
    pub fn new(id: ItemId, name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            category: category.into(),
            supplement_type: String::new(),
            goals: Vec::new(),
            status: ItemStatus::Active,
        }
    }

    pub fn with_supplement_type(mut self, supplement_type: impl Into<String>) -> Self {
        self.supplement_type = supplement_type.into();
        self
    }

    pub fn with_goals(mut self, goals: &[&str]) -> Self {
        self.goals = goals.iter().map(|g| g.to_string()).collect();
        self
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == ItemStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaterProfile {
    pub rater_id: RaterId,
    pub goal: Option<String>,
    pub dietary_restrictions: Vec<String>,
}

impl RaterProfile {
    pub fn new(rater_id: RaterId) -> Self {
        Self {
            rater_id,
            goal: None,
            dietary_restrictions: Vec::new(),
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }

    pub fn with_restrictions(mut self, restrictions: &[&str]) -> Self {
        self.dietary_restrictions = restrictions.iter().map(|r| r.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item_id: ItemId,
    pub score: f32,
}

impl ScoredItem {
    pub fn new(item_id: ItemId, score: f32) -> Self {
        Self { item_id, score }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub rater_id: RaterId,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSource {
    Collaborative,
    Content,
    Personalized,
}

impl fmt::Display for RecommendationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecommendationSource::Collaborative => "collaborative",
            RecommendationSource::Content => "content",
            RecommendationSource::Personalized => "personalized",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub rater_id: RaterId,
    pub item_id: ItemId,
    pub score: f32,
    pub source: RecommendationSource,
    pub clicked: bool,
    pub purchased: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recommendation {
    pub fn new(rater_id: RaterId, item: ScoredItem, source: RecommendationSource) -> Self {
        let now = Utc::now();
        Self {
            rater_id,
            item_id: item.item_id,
            score: item.score,
            source,
            clicked: false,
            purchased: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ProductView,
    ProductClick,
    ReviewSubmit,
    ReviewHelpful,
    RecShown,
    RecClicked,
    RecPurchased,
    Search,
    FilterApply,
    SortApplied,
    Login,
    Logout,
    Register,
    ProfileSetup,
    ProfileUpdate,
    PageLoad,
    ApiCall,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ProductView => "product_view",
            EventType::ProductClick => "product_click",
            EventType::ReviewSubmit => "review_submit",
            EventType::ReviewHelpful => "review_helpful",
            EventType::RecShown => "rec_shown",
            EventType::RecClicked => "rec_clicked",
            EventType::RecPurchased => "rec_purchased",
            EventType::Search => "search",
            EventType::FilterApply => "filter_apply",
            EventType::SortApplied => "sort_applied",
            EventType::Login => "login",
            EventType::Logout => "logout",
            EventType::Register => "register",
            EventType::ProfileSetup => "profile_setup",
            EventType::ProfileUpdate => "profile_update",
            EventType::PageLoad => "page_load",
            EventType::ApiCall => "api_call",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let event_type = match s {
            "product_view" => EventType::ProductView,
            "product_click" => EventType::ProductClick,
            "review_submit" => EventType::ReviewSubmit,
            "review_helpful" => EventType::ReviewHelpful,
            "rec_shown" => EventType::RecShown,
            "rec_clicked" => EventType::RecClicked,
            "rec_purchased" => EventType::RecPurchased,
            "search" => EventType::Search,
            "filter_apply" => EventType::FilterApply,
            "sort_applied" => EventType::SortApplied,
            "login" => EventType::Login,
            "logout" => EventType::Logout,
            "register" => EventType::Register,
            "profile_setup" => EventType::ProfileSetup,
            "profile_update" => EventType::ProfileUpdate,
            "page_load" => EventType::PageLoad,
            "api_call" => EventType::ApiCall,
            other => return Err(format!("unknown event type: {}", other)),
        };
        Ok(event_type)
    }
}

/// Uniqueness key for logged events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub rater_id: RaterId,
    pub item_id: ItemId,
    pub event_type: EventType,
    pub scope_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub rater_id: RaterId,
    pub item_id: ItemId,
    pub event_type: EventType,
    pub scope_key: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Backfilled events carry their original time; live events are stamped on insert.
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl NewEvent {
    pub fn new(
        rater_id: RaterId,
        item_id: ItemId,
        event_type: EventType,
        scope_key: impl Into<String>,
    ) -> Self {
        Self {
            rater_id,
            item_id,
            event_type,
            scope_key: scope_key.into(),
            metadata: serde_json::Value::Null,
            occurred_at: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            rater_id: self.rater_id,
            item_id: self.item_id,
            event_type: self.event_type,
            scope_key: self.scope_key.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub rater_id: RaterId,
    pub item_id: ItemId,
    pub event_type: EventType,
    pub scope_key: String,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    pub fn key(&self) -> EventKey {
        EventKey {
            rater_id: self.rater_id,
            item_id: self.item_id,
            event_type: self.event_type,
            scope_key: self.scope_key.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStats {
    pub total_events: u64,
    pub unique_items: u64,
    pub events_by_type: std::collections::BTreeMap<String, u64>,
    pub last_event: Option<EventRecord>,
    pub days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub item_id: ItemId,
    pub score: f32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub rater_id: RaterId,
    pub recommendations: Vec<RecommendationItem>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixStats {
    pub generation: u64,
    pub raters: usize,
    pub items: usize,
    pub ratings: usize,
    pub built_at: DateTime<Utc>,
}
