//! Recurring transaction materialization.
//!
//! A template (a transaction with `is_recurring` set) produces a concrete,
//! non-recurring copy of itself once enough whole days have passed since its
//! last checkpoint: 7 for weekly templates, 30 for monthly ones. Each run walks
//! every template once; failures on one template never stop the others.
//!
//! Two runs may overlap (an HTTP trigger and the scheduler, say). A template is
//! only materialized while its id is held in [`TemplateLocks`], its checkpoint
//! is re-read under that lock, and the instance insert commits in one store
//! transaction with a compare-and-swap of the checkpoint against the value
//! the run originally observed. Runs in other processes, which do not share
//! the locks, therefore cannot both leave an instance for the same period.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::error::StoreError;
use crate::models::{NewTransaction, Recurrence, Transaction};

/// Persistence operations the materializer depends on.
pub trait TransactionStore {
    /// All records with `is_recurring = true` and a recurrence set.
    fn find_templates(&self) -> Result<Vec<Transaction>, StoreError>;

    /// The template's checkpoint as currently stored.
    fn current_checkpoint(&self, template_id: i64) -> Result<Option<NaiveDate>, StoreError>;

    fn insert(&self, record: &NewTransaction) -> Result<i64, StoreError>;

    /// Set the checkpoint to `new` if it still equals `expected`, otherwise
    /// fail with [`StoreError::StaleCheckpoint`].
    fn update_checkpoint(
        &self,
        template_id: i64,
        expected: Option<NaiveDate>,
        new: NaiveDate,
    ) -> Result<(), StoreError>;

    /// Run `unit` so that its writes persist together or not at all. The
    /// store handed to `unit` is bound to that single unit of work.
    fn atomically(
        &self,
        unit: &mut dyn FnMut(&dyn TransactionStore) -> Result<i64, StoreError>,
    ) -> Result<i64, StoreError>;
}

/// Process-wide registry of templates currently being materialized.
#[derive(Clone, Default)]
pub struct TemplateLocks(Arc<Mutex<HashSet<i64>>>);

impl TemplateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `template_id`, or `None` if another run holds it.
    pub fn try_acquire(&self, template_id: i64) -> Option<TemplateGuard> {
        let mut held = self.0.lock().unwrap_or_else(|e| e.into_inner());
        held.insert(template_id).then(|| TemplateGuard {
            locks: self.clone(),
            template_id,
        })
    }

    pub fn is_held(&self, template_id: i64) -> bool {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&template_id)
    }
}

/// Releases the template when dropped.
pub struct TemplateGuard {
    locks: TemplateLocks,
    template_id: i64,
}

impl Drop for TemplateGuard {
    fn drop(&mut self) {
        self.locks
            .0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.template_id);
    }
}

/// Step at which a template's materialization failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Revalidate,
    Insert,
    Checkpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateFailure {
    pub template_id: i64,
    pub title: String,
    pub stage: FailureStage,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterializationReport {
    pub as_of: NaiveDate,
    pub generated_count: usize,
    /// Titles of templates whose instance was inserted and checkpointed.
    pub generated_titles: Vec<String>,
    /// Due templates left to a concurrent run.
    pub skipped: usize,
    pub failures: Vec<TemplateFailure>,
}

impl MaterializationReport {
    fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            generated_count: 0,
            generated_titles: Vec::new(),
            skipped: 0,
            failures: Vec::new(),
        }
    }

    fn record_generated(&mut self, title: &str) {
        self.generated_titles.push(title.to_string());
        self.generated_count = self.generated_titles.len();
    }
}

/// Whole days from `anchor` to `as_of`; negative if `anchor` is later.
pub fn days_since(anchor: NaiveDate, as_of: NaiveDate) -> i64 {
    (as_of - anchor).num_days()
}

pub fn is_due(recurrence: Recurrence, anchor: NaiveDate, as_of: NaiveDate) -> bool {
    days_since(anchor, as_of) >= recurrence.threshold_days()
}

enum Outcome {
    Generated(i64),
    /// Another run moved the checkpoint, or the template vanished.
    Superseded,
}

/// Materialize every template due on `as_of`.
///
/// Only a failure to fetch the templates fails the run as a whole.
pub fn run_materialization<S>(
    store: &S,
    locks: &TemplateLocks,
    as_of: NaiveDate,
) -> Result<MaterializationReport, StoreError>
where
    S: TransactionStore + ?Sized,
{
    let templates = store.find_templates()?;
    info!(count = templates.len(), %as_of, "Processing recurring templates");

    let mut report = MaterializationReport::new(as_of);

    for template in &templates {
        let Some(recurrence) = template.recurrence.filter(|_| template.is_recurring) else {
            continue;
        };

        let anchor = template.anchor_date();
        if !is_due(recurrence, anchor, as_of) {
            trace!(
                template_id = template.id,
                days = days_since(anchor, as_of),
                "Template not due"
            );
            continue;
        }

        let Some(_guard) = locks.try_acquire(template.id) else {
            debug!(template_id = template.id, "Template held by a concurrent run");
            report.skipped += 1;
            continue;
        };

        match materialize_one(store, template, as_of) {
            Ok(Outcome::Generated(instance_id)) => {
                info!(
                    template_id = template.id,
                    instance_id,
                    title = %template.title,
                    "Generated recurring entry"
                );
                report.record_generated(&template.title);
            }
            Ok(Outcome::Superseded) => {
                debug!(template_id = template.id, "Template already handled elsewhere");
                report.skipped += 1;
            }
            Err((stage, e)) => {
                warn!(
                    template_id = template.id,
                    title = %template.title,
                    ?stage,
                    error = %e,
                    "Failed to materialize template"
                );
                report.failures.push(TemplateFailure {
                    template_id: template.id,
                    title: template.title.clone(),
                    stage,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        generated = report.generated_count,
        skipped = report.skipped,
        failed = report.failures.len(),
        "Materialization finished"
    );
    Ok(report)
}

fn materialize_one<S>(
    store: &S,
    template: &Transaction,
    as_of: NaiveDate,
) -> Result<Outcome, (FailureStage, StoreError)>
where
    S: TransactionStore + ?Sized,
{
    match store.current_checkpoint(template.id) {
        Ok(current) if current != template.last_generated_date => {
            return Ok(Outcome::Superseded)
        }
        Ok(_) => {}
        Err(StoreError::TemplateNotFound(_)) => return Ok(Outcome::Superseded),
        Err(e) => return Err((FailureStage::Revalidate, e)),
    }

    let instance = NewTransaction::materialized_from(template, as_of);
    let mut stage = FailureStage::Insert;

    // The instance and the checkpoint commit together. A run that loses the
    // compare-and-swap leaves no instance behind.
    let committed = store.atomically(&mut |unit| {
        stage = FailureStage::Insert;
        let instance_id = unit.insert(&instance)?;
        stage = FailureStage::Checkpoint;
        unit.update_checkpoint(template.id, template.last_generated_date, as_of)?;
        Ok(instance_id)
    });

    match committed {
        Ok(instance_id) => Ok(Outcome::Generated(instance_id)),
        Err(StoreError::StaleCheckpoint(_) | StoreError::TemplateNotFound(_))
            if stage == FailureStage::Checkpoint =>
        {
            Ok(Outcome::Superseded)
        }
        Err(e) => Err((stage, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn template(
        id: i64,
        title: &str,
        recurrence: Recurrence,
        date: NaiveDate,
        last: Option<NaiveDate>,
    ) -> Transaction {
        Transaction {
            id,
            user_id: "user-1".into(),
            amount_cents: 50_000,
            title: title.into(),
            date,
            is_income: false,
            category_name: Some("Health".into()),
            split_with: Some("Sam".into()),
            is_impulse: true,
            is_recurring: true,
            recurrence: Some(recurrence),
            last_generated_date: last,
            created_at: "2024-01-01 00:00:00".into(),
            updated_at: "2024-01-01 00:00:00".into(),
        }
    }

    #[derive(Default)]
    struct FakeStore {
        templates: RefCell<Vec<Transaction>>,
        inserted: RefCell<Vec<NewTransaction>>,
        fail_fetch: bool,
        fail_insert_titles: Vec<String>,
        fail_checkpoint_ids: Vec<i64>,
        /// Checkpoints a "concurrent run" wrote after our fetch.
        moved_checkpoints: HashMap<i64, NaiveDate>,
        /// Checkpoints another process commits after our revalidation but
        /// before our unit of work starts.
        raced_checkpoints: RefCell<HashMap<i64, NaiveDate>>,
    }

    impl FakeStore {
        fn with(templates: Vec<Transaction>) -> Self {
            Self {
                templates: RefCell::new(templates),
                ..Default::default()
            }
        }

        fn checkpoint_of(&self, id: i64) -> Option<NaiveDate> {
            self.templates
                .borrow()
                .iter()
                .find(|t| t.id == id)
                .and_then(|t| t.last_generated_date)
        }
    }

    impl TransactionStore for FakeStore {
        fn find_templates(&self) -> Result<Vec<Transaction>, StoreError> {
            if self.fail_fetch {
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            Ok(self.templates.borrow().clone())
        }

        fn current_checkpoint(&self, template_id: i64) -> Result<Option<NaiveDate>, StoreError> {
            if let Some(moved) = self.moved_checkpoints.get(&template_id) {
                return Ok(Some(*moved));
            }
            self.templates
                .borrow()
                .iter()
                .find(|t| t.id == template_id)
                .map(|t| t.last_generated_date)
                .ok_or(StoreError::TemplateNotFound(template_id))
        }

        fn insert(&self, record: &NewTransaction) -> Result<i64, StoreError> {
            if self.fail_insert_titles.contains(&record.title) {
                return Err(StoreError::Unavailable("insert rejected".into()));
            }
            let mut inserted = self.inserted.borrow_mut();
            inserted.push(record.clone());
            Ok(1000 + inserted.len() as i64)
        }

        fn update_checkpoint(
            &self,
            template_id: i64,
            expected: Option<NaiveDate>,
            new: NaiveDate,
        ) -> Result<(), StoreError> {
            if self.fail_checkpoint_ids.contains(&template_id) {
                return Err(StoreError::Unavailable("update rejected".into()));
            }
            let mut templates = self.templates.borrow_mut();
            let t = templates
                .iter_mut()
                .find(|t| t.id == template_id)
                .ok_or(StoreError::TemplateNotFound(template_id))?;
            if t.last_generated_date != expected {
                return Err(StoreError::StaleCheckpoint(template_id));
            }
            t.last_generated_date = Some(new);
            Ok(())
        }

        fn atomically(
            &self,
            unit: &mut dyn FnMut(&dyn TransactionStore) -> Result<i64, StoreError>,
        ) -> Result<i64, StoreError> {
            for (id, raced) in self.raced_checkpoints.borrow_mut().drain() {
                if let Some(t) = self.templates.borrow_mut().iter_mut().find(|t| t.id == id) {
                    t.last_generated_date = Some(raced);
                }
            }

            let templates = self.templates.borrow().clone();
            let inserted = self.inserted.borrow().clone();
            let result = unit(self);
            if result.is_err() {
                *self.templates.borrow_mut() = templates;
                *self.inserted.borrow_mut() = inserted;
            }
            result
        }
    }

    fn run(store: &FakeStore, as_of: NaiveDate) -> MaterializationReport {
        run_materialization(store, &TemplateLocks::new(), as_of).unwrap()
    }

    #[test]
    fn test_weekly_threshold() {
        let d = date(2024, 3, 1);
        let store = FakeStore::with(vec![template(
            1,
            "Cleaner",
            Recurrence::Weekly,
            date(2023, 1, 1),
            Some(d),
        )]);

        let report = run(&store, d + chrono::Days::new(6));
        assert_eq!(report.generated_count, 0);
        assert!(store.inserted.borrow().is_empty());

        let report = run(&store, d + chrono::Days::new(7));
        assert_eq!(report.generated_titles, vec!["Cleaner".to_string()]);
        assert_eq!(store.checkpoint_of(1), Some(date(2024, 3, 8)));
    }

    #[test]
    fn test_monthly_threshold() {
        let d = date(2024, 5, 10);
        let store = FakeStore::with(vec![template(1, "Rent", Recurrence::Monthly, d, Some(d))]);

        assert_eq!(run(&store, d + chrono::Days::new(29)).generated_count, 0);

        let report = run(&store, d + chrono::Days::new(30));
        assert_eq!(report.generated_count, 1);
        assert_eq!(store.checkpoint_of(1), Some(date(2024, 6, 9)));
    }

    #[test]
    fn test_same_day_rerun_is_idempotent() {
        let store =
            FakeStore::with(vec![template(1, "Gym", Recurrence::Weekly, date(2024, 1, 1), None)]);
        let as_of = date(2024, 1, 8);

        assert_eq!(run(&store, as_of).generated_count, 1);
        let second = run(&store, as_of);
        assert_eq!(second.generated_count, 0);
        assert_eq!(store.inserted.borrow().len(), 1);
    }

    #[test]
    fn test_anchor_falls_back_to_template_date() {
        let d = date(2024, 2, 1);
        let never_generated = FakeStore::with(vec![template(1, "A", Recurrence::Weekly, d, None)]);
        let checkpointed =
            FakeStore::with(vec![template(1, "A", Recurrence::Weekly, date(2020, 1, 1), Some(d))]);

        for offset in [6, 7] {
            let as_of = d + chrono::Days::new(offset);
            assert_eq!(
                run(&never_generated, as_of).generated_count,
                run(&checkpointed, as_of).generated_count
            );
        }
    }

    #[test]
    fn test_generated_record_copies_template() {
        let t = template(1, "Gym", Recurrence::Monthly, date(2024, 1, 1), None);
        let store = FakeStore::with(vec![t.clone()]);
        let as_of = date(2024, 1, 31);

        run(&store, as_of);

        let inserted = store.inserted.borrow();
        let instance = &inserted[0];
        assert_eq!(instance.user_id, t.user_id);
        assert_eq!(instance.amount_cents, t.amount_cents);
        assert_eq!(instance.title, t.title);
        assert_eq!(instance.is_income, t.is_income);
        assert_eq!(instance.category_name, t.category_name);
        assert_eq!(instance.split_with, t.split_with);
        assert_eq!(instance.date, as_of);
        assert!(!instance.is_recurring);
        assert!(!instance.is_impulse);
        assert_eq!(instance.recurrence, None);
    }

    #[test]
    fn test_insert_failure_is_isolated() {
        let start = date(2024, 1, 1);
        let mut store = FakeStore::with(vec![
            template(1, "Broken", Recurrence::Weekly, start, None),
            template(2, "Works", Recurrence::Weekly, start, None),
        ]);
        store.fail_insert_titles = vec!["Broken".into()];

        let report = run(&store, date(2024, 1, 10));

        assert_eq!(report.generated_titles, vec!["Works".to_string()]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].template_id, 1);
        assert_eq!(report.failures[0].stage, FailureStage::Insert);
        assert_eq!(store.checkpoint_of(1), None);
        assert_eq!(store.checkpoint_of(2), Some(date(2024, 1, 10)));
    }

    #[test]
    fn test_checkpoint_failure_excluded_from_report() {
        let mut store = FakeStore::with(vec![template(
            1,
            "Netflix",
            Recurrence::Monthly,
            date(2024, 1, 1),
            None,
        )]);
        store.fail_checkpoint_ids = vec![1];

        let report = run(&store, date(2024, 2, 5));

        assert_eq!(report.generated_count, 0);
        assert_eq!(report.failures[0].stage, FailureStage::Checkpoint);
        // The insert is rolled back and the template stays eligible.
        assert!(store.inserted.borrow().is_empty());
        assert_eq!(store.checkpoint_of(1), None);
    }

    #[test]
    fn test_checkpoint_claimed_by_other_process_rolls_back_insert() {
        let store =
            FakeStore::with(vec![template(1, "Gym", Recurrence::Weekly, date(2024, 1, 1), None)]);
        store
            .raced_checkpoints
            .borrow_mut()
            .insert(1, date(2024, 1, 8));

        let report = run(&store, date(2024, 1, 8));

        assert_eq!(report.generated_count, 0);
        assert_eq!(report.skipped, 1);
        assert!(report.failures.is_empty());
        assert!(store.inserted.borrow().is_empty());
        assert_eq!(store.checkpoint_of(1), Some(date(2024, 1, 8)));
    }

    #[test]
    fn test_fetch_failure_fails_the_run() {
        let store = FakeStore {
            fail_fetch: true,
            ..Default::default()
        };
        let result = run_materialization(&store, &TemplateLocks::new(), date(2024, 1, 1));
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn test_locked_template_is_skipped() {
        let store =
            FakeStore::with(vec![template(1, "Gym", Recurrence::Weekly, date(2024, 1, 1), None)]);
        let locks = TemplateLocks::new();
        let guard = locks.try_acquire(1).unwrap();

        let report = run_materialization(&store, &locks, date(2024, 1, 8)).unwrap();
        assert_eq!(report.skipped, 1);
        assert!(store.inserted.borrow().is_empty());

        drop(guard);
        assert!(!locks.is_held(1));
        let report = run_materialization(&store, &locks, date(2024, 1, 8)).unwrap();
        assert_eq!(report.generated_count, 1);
    }

    #[test]
    fn test_checkpoint_moved_by_concurrent_run_is_skipped() {
        let mut store =
            FakeStore::with(vec![template(1, "Gym", Recurrence::Weekly, date(2024, 1, 1), None)]);
        store.moved_checkpoints.insert(1, date(2024, 1, 8));

        let report = run(&store, date(2024, 1, 8));

        assert_eq!(report.generated_count, 0);
        assert_eq!(report.skipped, 1);
        assert!(report.failures.is_empty());
        assert!(store.inserted.borrow().is_empty());
    }

    #[test]
    fn test_future_anchor_is_not_due() {
        let store =
            FakeStore::with(vec![template(1, "Later", Recurrence::Weekly, date(2025, 1, 1), None)]);
        assert_eq!(run(&store, date(2024, 1, 1)).generated_count, 0);
        assert_eq!(days_since(date(2025, 1, 1), date(2024, 12, 31)), -1);
    }

    #[test]
    fn test_gym_example() {
        let store =
            FakeStore::with(vec![template(7, "Gym", Recurrence::Monthly, date(2024, 1, 1), None)]);

        let report = run(&store, date(2024, 1, 31));
        assert_eq!(report.generated_titles, vec!["Gym".to_string()]);
        assert_eq!(store.inserted.borrow()[0].amount_cents, 50_000);
        assert_eq!(store.checkpoint_of(7), Some(date(2024, 1, 31)));

        assert_eq!(run(&store, date(2024, 2, 15)).generated_count, 0);
    }
}
