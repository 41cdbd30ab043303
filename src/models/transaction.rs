use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{AppError, AppResult};

const MAX_TITLE_LEN: usize = 200;

/// How often a recurring template produces a concrete transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Weekly,
    Monthly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Minimum number of whole days between two generated instances.
    /// A rolling threshold: "monthly" is 30 days, not a calendar month.
    pub fn threshold_days(self) -> i64 {
        match self {
            Self::Weekly => 7,
            Self::Monthly => 30,
        }
    }
}

impl FromStr for Recurrence {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: String,
    pub amount_cents: i64,
    pub title: String,
    pub date: NaiveDate,
    pub is_income: bool,
    pub category_name: Option<String>,
    pub split_with: Option<String>,
    pub is_impulse: bool,
    pub is_recurring: bool,
    pub recurrence: Option<Recurrence>,
    /// Date this template last produced a concrete instance.
    pub last_generated_date: Option<NaiveDate>,
    pub created_at: String,
    pub updated_at: String,
}

impl Transaction {
    /// Baseline for the due check: the last checkpoint, or the template's
    /// own date before anything has been generated from it.
    pub fn anchor_date(&self) -> NaiveDate {
        self.last_generated_date.unwrap_or(self.date)
    }
}

/// A transaction ready to be inserted or written over an existing row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub user_id: String,
    pub amount_cents: i64,
    pub title: String,
    pub date: NaiveDate,
    pub is_income: bool,
    pub category_name: Option<String>,
    pub split_with: Option<String>,
    pub is_impulse: bool,
    pub is_recurring: bool,
    pub recurrence: Option<Recurrence>,
}

impl NewTransaction {
    /// The concrete instance a template produces on `as_of`. Instances are
    /// never templates themselves and are never flagged as impulse spending.
    pub fn materialized_from(template: &Transaction, as_of: NaiveDate) -> Self {
        Self {
            user_id: template.user_id.clone(),
            amount_cents: template.amount_cents,
            title: template.title.clone(),
            date: as_of,
            is_income: template.is_income,
            category_name: template.category_name.clone(),
            split_with: template.split_with.clone(),
            is_impulse: false,
            is_recurring: false,
            recurrence: None,
        }
    }
}

/// Request body for creating or replacing a transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionInput {
    pub amount_cents: i64,
    pub title: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub is_income: bool,
    pub category_name: Option<String>,
    pub split_with: Option<String>,
    #[serde(default)]
    pub is_impulse: bool,
    #[serde(default)]
    pub is_recurring: bool,
    pub recurrence: Option<Recurrence>,
}

impl TransactionInput {
    /// Validate and normalize the input for `user_id`.
    ///
    /// Income clears the category and the impulse flag; a non-recurring
    /// transaction never carries a recurrence.
    pub fn into_new(self, user_id: &str) -> AppResult<NewTransaction> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(AppError::Validation("Title is required".into()));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(AppError::Validation(format!(
                "Title must be at most {} characters",
                MAX_TITLE_LEN
            )));
        }
        if self.amount_cents < 0 {
            return Err(AppError::Validation("Amount must not be negative".into()));
        }

        let recurrence = if self.is_recurring {
            match self.recurrence {
                Some(r) => Some(r),
                None => {
                    return Err(AppError::Validation(
                        "Recurring transactions need a recurrence (weekly or monthly)".into(),
                    ))
                }
            }
        } else {
            None
        };

        let (category_name, is_impulse) = if self.is_income {
            (None, false)
        } else {
            (non_empty(self.category_name), self.is_impulse)
        };

        Ok(NewTransaction {
            user_id: user_id.to_string(),
            amount_cents: self.amount_cents,
            title,
            date: self.date,
            is_income: self.is_income,
            category_name,
            split_with: non_empty(self.split_with),
            is_impulse,
            is_recurring: self.is_recurring,
            recurrence,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
