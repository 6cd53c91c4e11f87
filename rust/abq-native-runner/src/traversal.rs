//! The selective runner.
//!
//! Walks the whole tree once, descending only into groups that contain the
//! current target. Each group's "before all" hooks run at most once however
//! many of its tests are requested, provided the directives arrive in
//! manifest order.

use std::io::{Read, Write};

use crate::execution::{Execution, Interrupt};
use crate::host::{GroupNode, TestFramework, TestNode, TestTree};
use crate::ordering::OrderingStrategy;
use crate::reporter::encode_result;
use crate::session::Session;
use crate::WorkerError;

/// Result of walking a group's own tests and children before any
/// interrupt is handled.
type Walked = Result<(), Interrupt>;

pub(crate) struct Traversal<'a, S, H: ?Sized> {
    session: &'a mut Session<S>,
    host: &'a mut H,
    strategy: &'a OrderingStrategy,
    reported: usize,
}

impl<'a, S: Read + Write, H: TestFramework + ?Sized> Traversal<'a, S, H> {
    pub(crate) fn new(
        session: &'a mut Session<S>,
        host: &'a mut H,
        strategy: &'a OrderingStrategy,
    ) -> Self {
        Self {
            session,
            host,
            strategy,
            reported: 0,
        }
    }

    pub(crate) fn reported(&self) -> usize {
        self.reported
    }

    /// Walk every root group. Returns whether every executed test succeeded.
    pub(crate) fn run_roots(&mut self, tree: &TestTree) -> Result<bool, WorkerError> {
        let mut success = true;
        for group in self.strategy.order(&tree.groups, None) {
            let mut lineage = Vec::new();
            success &= self.run_group(group, &mut lineage)?;
        }
        Ok(success)
    }

    fn run_group(
        &mut self,
        group: &GroupNode,
        lineage: &mut Vec<String>,
    ) -> Result<bool, WorkerError> {
        if !self.session.target().in_group(&group.address) {
            return Ok(true);
        }
        let _span = tracing::debug_span!("group", id = %group.id).entered();
        lineage.push(group.description.clone());

        let mut success = true;
        let hooks = group.has_tests();
        let walked = if hooks {
            match self.host.before_all(group) {
                Ok(()) => self.walk(group, lineage, &mut success),
                Err(interrupt) => Ok(Err(interrupt)),
            }
        } else {
            self.walk(group, lineage, &mut success)
        };

        let outcome = match walked {
            Ok(Ok(())) => Ok(success),
            Ok(Err(interrupt)) => self
                .finish_interrupted(group, lineage, &interrupt)
                .map(|interrupt_ok| success && interrupt_ok),
            Err(e) => Err(e),
        };

        if hooks {
            self.host.after_all(group);
        }
        lineage.pop();
        outcome
    }

    /// Run the targeted tests directly in `group`, then its children.
    fn walk(
        &mut self,
        group: &GroupNode,
        lineage: &mut Vec<String>,
        success: &mut bool,
    ) -> Result<Walked, WorkerError> {
        if self.session.target().directly_in_group(&group.address)? {
            for test in self.strategy.order(&group.tests, group.ordering) {
                if !self.session.target().is_test(&test.address) {
                    continue;
                }
                let execution = match self.host.run_test(group, test) {
                    Ok(execution) => execution,
                    Err(interrupt) => return Ok(Err(interrupt)),
                };
                *success &= execution.succeeded();
                self.report(test, lineage, &execution)?;
                self.session.fetch_next()?;
                if !self.session.target().directly_in_group(&group.address)? {
                    break;
                }
            }
        }

        for child in self.strategy.order(&group.children, group.ordering) {
            *success &= self.run_group(child, lineage)?;
        }
        Ok(Ok(()))
    }

    /// Give every remaining targeted test of `group` the interrupt's
    /// outcome. Returns whether the group still counts as passing.
    fn finish_interrupted(
        &mut self,
        group: &GroupNode,
        lineage: &mut Vec<String>,
        interrupt: &Interrupt,
    ) -> Result<bool, WorkerError> {
        match interrupt {
            Interrupt::Raise(raised) => tracing::warn!(
                group = %group.id,
                class = raised.class_name(),
                message = %raised.message,
                "group interrupted; failing its remaining tests"
            ),
            Interrupt::Skip { reason } => tracing::info!(
                group = %group.id,
                ?reason,
                "group skipped; skipping its remaining tests"
            ),
        }
        self.conclude_remaining(group, lineage, interrupt)?;
        Ok(matches!(interrupt, Interrupt::Skip { .. }))
    }

    /// Own tests first, then descendants, in configured order. One
    /// directive is consumed per concluded test.
    fn conclude_remaining(
        &mut self,
        group: &GroupNode,
        lineage: &mut Vec<String>,
        interrupt: &Interrupt,
    ) -> Result<(), WorkerError> {
        for test in self.strategy.order(&group.tests, group.ordering) {
            if !self.session.target().is_test(&test.address) {
                continue;
            }
            self.report(test, lineage, &Execution::interrupted(interrupt))?;
            self.session.fetch_next()?;
        }

        for child in self.strategy.order(&group.children, group.ordering) {
            if !self.session.target().in_group(&child.address) {
                continue;
            }
            lineage.push(child.description.clone());
            let concluded = self.conclude_remaining(child, lineage, interrupt);
            lineage.pop();
            concluded?;
        }
        Ok(())
    }

    fn report(
        &mut self,
        test: &TestNode,
        lineage: &[String],
        execution: &Execution,
    ) -> Result<(), WorkerError> {
        self.session.report(encode_result(test, lineage, execution))?;
        self.reported += 1;
        Ok(())
    }
}
