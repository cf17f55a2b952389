//! Materializes due recurring templates into concrete transactions.

use std::sync::Arc;

use chrono::NaiveDate;
use fintrack_shared::AppError;
use fintrack_shared::config::RecurringConfig;
use tracing::{info, warn};

use super::error::RecurringError;
use super::schedule::compute_next_occurrence;
use super::types::{MaterializedOccurrence, RecurringRunReport, RecurringTemplate, TemplateFailure};
use crate::clock::Clock;
use crate::ledger::LedgerMutator;
use crate::notify::{LedgerEvent, NotificationSink, publish};
use crate::storage::{LedgerStore, UnitOfWork};

/// What happened to one template in a run.
#[derive(Debug)]
enum Step {
    /// Another run got there first, or the template is no longer due.
    Skipped,
    /// Due but already terminal; deactivated without materializing.
    Retired,
    /// One occurrence was created.
    Materialized {
        occurrence: MaterializedOccurrence,
        deactivated: bool,
    },
}

/// Recurring transaction engine.
///
/// Each template is processed in its own unit of work holding the template
/// lock and the locks of the accounts it books against. A failure rolls back
/// that template only and is collected in the run report.
pub struct RecurringEngine<S: LedgerStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
    config: RecurringConfig,
}

impl<S: LedgerStore> RecurringEngine<S> {
    /// Creates a new engine.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
        config: RecurringConfig,
    ) -> Self {
        Self {
            store,
            clock,
            sink,
            config,
        }
    }

    /// Configured step cap for occurrence counting.
    #[must_use]
    pub fn max_occurrence_steps(&self) -> u32 {
        self.config.max_occurrence_steps
    }

    /// Processes every template due on the clock's current date.
    ///
    /// # Errors
    ///
    /// Returns an error only if the due templates cannot be listed.
    pub fn run(&self) -> Result<RecurringRunReport, RecurringError> {
        self.process_due(self.clock.today())
    }

    /// Processes every template due on or before `today`.
    ///
    /// Materializes at most one occurrence per template per call; a template
    /// that is several occurrences behind catches up over successive runs.
    ///
    /// # Errors
    ///
    /// Returns an error only if the due templates cannot be listed.
    pub fn process_due(&self, today: NaiveDate) -> Result<RecurringRunReport, RecurringError> {
        let due = self.store.due_recurring(today)?;
        let mut report = RecurringRunReport::new(today);

        for template in &due {
            match self.process_template(template, today) {
                Ok(Step::Skipped) => {}
                Ok(Step::Retired) => {
                    info!(template_id = %template.id, "Recurring template retired");
                    self.deactivated(template, &mut report);
                }
                Ok(Step::Materialized {
                    occurrence,
                    deactivated,
                }) => {
                    info!(
                        template_id = %occurrence.template_id,
                        transaction_id = %occurrence.transaction_id,
                        date = %occurrence.date,
                        "Recurring occurrence materialized"
                    );
                    publish(
                        self.sink.as_ref(),
                        &LedgerEvent::OccurrenceMaterialized {
                            template_id: occurrence.template_id,
                            transaction_id: occurrence.transaction_id,
                            date: occurrence.date,
                        },
                    );
                    report.materialized.push(occurrence);
                    if deactivated {
                        self.deactivated(template, &mut report);
                    }
                }
                Err(e) => {
                    warn!(template_id = %template.id, error = %e, "Recurring template failed");
                    report
                        .failures
                        .push(TemplateFailure::new(template.id, &AppError::from(e)));
                }
            }
        }

        info!(
            run_date = %today,
            materialized = report.materialized.len(),
            deactivated = report.deactivated.len(),
            failed = report.failures.len(),
            "Recurring run finished"
        );
        Ok(report)
    }

    fn process_template(
        &self,
        listed: &RecurringTemplate,
        today: NaiveDate,
    ) -> Result<Step, RecurringError> {
        let mut uow = self.store.begin(listed.lock_set())?;
        let mut template = uow
            .recurring_template(listed.id)?
            .ok_or(RecurringError::TemplateNotFound(listed.id))?;

        if !template.is_due(today) {
            return Ok(Step::Skipped);
        }
        if !template.is_eligible(today) {
            template.is_active = false;
            uow.save_recurring_template(&template)?;
            uow.commit()?;
            return Ok(Step::Retired);
        }

        let tx = template.materialize(self.clock.now());
        uow.insert_transaction(&tx)?;
        LedgerMutator::apply(&mut uow, &tx.effect())?;

        template.occurrences_count += 1;
        let next =
            compute_next_occurrence(template.next_occurrence, template.frequency, template.interval);
        match next {
            Some(next) => template.next_occurrence = next,
            None => template.is_active = false,
        }
        if template.is_exhausted() || template.is_past_end(template.next_occurrence) {
            template.is_active = false;
        }
        uow.save_recurring_template(&template)?;
        uow.commit()?;

        Ok(Step::Materialized {
            occurrence: MaterializedOccurrence {
                template_id: template.id,
                transaction_id: tx.id,
                date: tx.date,
                amount: tx.amount,
            },
            deactivated: !template.is_active,
        })
    }

    fn deactivated(&self, template: &RecurringTemplate, report: &mut RecurringRunReport) {
        publish(
            self.sink.as_ref(),
            &LedgerEvent::TemplateDeactivated {
                template_id: template.id,
            },
        );
        report.deactivated.push(template.id);
    }
}
