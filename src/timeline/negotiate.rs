//! # End/abort negotiation.
//!
//! Finishing a timeline finishes its whole subtree, and every node in it gets a
//! chance to object first.
//!
//! ## Architecture
//! ```text
//! terminate(root, action)
//!   ├─► guard: child with priority >= acting ─► InUse (abort stays pending)
//!   ├─► round loop (new generation each round):
//!   │     walk(node):
//!   │       first visit ─► state = Ending|Aborting, publish ENDING|ABORTING
//!   │                          └─ claimed ─► objection
//!   │       children not stamped this round ─► walk(child)
//!   │       repeat until node and children carry this round's stamp
//!   │     lock: whole subtree stamped and ours? ─► settled
//!   │           otherwise (attached meanwhile)  ─► next round
//!   ├─► objection ─► revert visited nodes, InUse
//!   └─► settled   ─► mark Ended|Aborted (no more children)
//!                 ─► publish ENDED|ABORTED leaf-first (claims ignored)
//!                 ─► unlink, drop contexts, release
//!                 ─► abort: forward to a lower-priority parent
//! ```
//!
//! ## Rules
//! - No lock is held while handlers run; handlers may start children, end
//!   siblings or set attributes.
//! - A node is announced at most once per negotiation.
//! - A node already negotiated by someone else makes this negotiation fail.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::registry::{Priority, Type};

use super::events;
use super::manager::{Checkout, Timelines};
use super::types::{State, TimelineRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Action {
    End,
    Abort,
}

impl Action {
    fn negotiating(self) -> State {
        match self {
            Action::End => State::Ending,
            Action::Abort => State::Aborting,
        }
    }

    fn terminal(self) -> State {
        match self {
            Action::End => State::Ended,
            Action::Abort => State::Aborted,
        }
    }

    fn negotiation_event(self) -> Type {
        match self {
            Action::End => events::ENDING,
            Action::Abort => events::ABORTING,
        }
    }

    fn terminal_event(self) -> Type {
        match self {
            Action::End => events::ENDED,
            Action::Abort => events::ABORTED,
        }
    }
}

/// One negotiation in flight.
struct Plan {
    root: TimelineRef,
    action: Action,
    acting: Priority,
    id: u64,
    reason: Option<Arc<str>>,
    /// Nodes announced by this negotiation with their state before it.
    visited: Vec<(TimelineRef, State)>,
}

impl Timelines {
    pub(super) fn terminate(
        &self,
        reference: TimelineRef,
        action: Action,
        acting: Option<Priority>,
        reason: Option<Arc<str>>,
    ) -> Result<()> {
        let (action, acting, reason, id) = {
            let mut forest = self.forest.lock();
            let node = forest.get_mut(reference)?;
            let action = match node.state {
                State::Start => action,
                State::Abort => Action::Abort,
                _ => return Err(Error::InUse),
            };
            let acting = acting.unwrap_or(node.priority);
            let reason = if action == Action::Abort {
                node.state = State::Abort;
                if reason.is_some() {
                    node.reason = reason;
                }
                node.reason.clone()
            } else {
                None
            };
            if forest.blocked(reference, acting) {
                debug!(
                    timeline = %reference,
                    ?action,
                    acting,
                    "postponed by higher-priority child"
                );
                return Err(Error::InUse);
            }
            if action == Action::End {
                forest.get_mut(reference)?.state = State::End;
            }
            (action, acting, reason, forest.next_generation())
        };

        let mut plan = Plan {
            root: reference,
            action,
            acting,
            id,
            reason,
            visited: Vec::new(),
        };

        let doomed = match self.negotiate(&mut plan) {
            Ok(doomed) => doomed,
            Err(e) => {
                self.revert(&plan);
                return Err(e);
            }
        };
        let parent = doomed.last().and_then(|(_, m)| m.parent);
        self.finalize(action, doomed);

        if action == Action::Abort {
            if let Some(parent) = parent {
                self.forward_abort(parent, acting, plan.reason);
            }
        }
        Ok(())
    }

    /// Runs rounds until the subtree is stable, then marks it terminal and
    /// returns it leaf-first with one usage count held per node.
    fn negotiate(&self, plan: &mut Plan) -> Result<Vec<(TimelineRef, events::TimelineMessage)>> {
        let mut generation = plan.id;
        let mut rounds = 0usize;
        loop {
            rounds += 1;
            let root = plan.root;
            self.walk(plan, root, generation)?;

            let mut forest = self.forest.lock();
            let subtree = forest.post_order(plan.root);
            let settled = subtree.iter().all(|r| {
                forest.get(*r).is_ok_and(|n| {
                    n.stamp >= generation
                        && n.negotiator == plan.id
                        && n.state == plan.action.negotiating()
                })
            });

            if settled {
                let terminal = plan.action.terminal();
                let mut doomed = Vec::with_capacity(subtree.len());
                for r in subtree {
                    let node = forest.get_mut(r)?;
                    node.state = terminal;
                    node.usage += 1;
                    doomed.push((r, node.message()));
                }
                return Ok(doomed);
            }
            let limit = self.cfg.negotiation_limit();
            if limit.is_some_and(|max| rounds >= max) {
                debug!(timeline = %plan.root, rounds, "negotiation did not settle");
                return Err(Error::InUse);
            }
            generation = forest.next_generation();
            trace!(timeline = %plan.root, generation, "subtree changed, renegotiating");
        }
    }

    /// Announces `reference` if needed, then walks its children until none is
    /// left unstamped for `generation`.
    fn walk(&self, plan: &mut Plan, reference: TimelineRef, generation: u64) -> Result<()> {
        loop {
            let announce = {
                let mut forest = self.forest.lock();
                let node = match forest.get_mut(reference) {
                    Ok(node) => node,
                    // a descendant may be finished by someone else meanwhile
                    Err(_) if reference != plan.root => return Ok(()),
                    Err(e) => return Err(e),
                };
                node.stamp = generation;
                let ours = node.negotiator == plan.id && node.state == plan.action.negotiating();
                if ours {
                    None
                } else {
                    match node.state {
                        State::Start | State::Abort => {}
                        State::End if reference == plan.root => {}
                        _ => return Err(Error::InUse),
                    }
                    plan.visited.push((reference, node.state));
                    node.state = plan.action.negotiating();
                    node.negotiator = plan.id;
                    if plan.action == Action::Abort && plan.reason.is_some() {
                        node.reason = plan.reason.clone();
                    }
                    node.usage += 1;
                    Some(node.message())
                }
            };

            if let Some(mut message) = announce {
                let _checkout = Checkout::adopt(self, reference);
                let delivery = self
                    .dispatcher
                    .publish(plan.action.negotiation_event(), &mut message);
                if delivery.is_handled() {
                    debug!(timeline = %reference, root = %plan.root, "objection");
                    return Err(Error::InUse);
                }
            }

            let pending = {
                let forest = self.forest.lock();
                let Ok(node) = forest.get(reference) else {
                    return Ok(());
                };
                let mut pending = Vec::new();
                for child in node.children.iter().filter_map(|c| forest.get(*c).ok()) {
                    if child.priority >= plan.acting {
                        debug!(
                            timeline = %child.reference,
                            acting = plan.acting,
                            "higher-priority child"
                        );
                        return Err(Error::InUse);
                    }
                    if child.stamp < generation {
                        pending.push(child.reference);
                    }
                }
                pending
            };

            for child in pending {
                self.walk(plan, child, generation)?;
            }

            let forest = self.forest.lock();
            let stable = forest.get(reference).map_or(true, |node| {
                node.stamp >= generation
                    && node
                        .children
                        .iter()
                        .filter_map(|c| forest.get(*c).ok())
                        .all(|c| c.stamp >= generation)
            });
            if stable {
                return Ok(());
            }
        }
    }

    /// Restores every node this negotiation announced.
    fn revert(&self, plan: &Plan) {
        let mut forest = self.forest.lock();
        for (reference, previous) in plan.visited.iter().rev() {
            if let Ok(node) = forest.get_mut(*reference) {
                if node.negotiator == plan.id && node.state == plan.action.negotiating() {
                    node.state = *previous;
                }
            }
        }
        if let Ok(root) = forest.get_mut(plan.root) {
            root.state = match (plan.action, root.state) {
                (Action::End, State::End) => State::Start,
                (_, state) => state,
            };
        }
    }

    /// Publishes the final events and removes the subtree.
    fn finalize(&self, action: Action, doomed: Vec<(TimelineRef, events::TimelineMessage)>) {
        let references: Vec<_> = doomed.iter().map(|(r, _)| *r).collect();
        for (reference, mut message) in doomed {
            trace!(timeline = %reference, ?action, "finished");
            self.dispatcher
                .publish(action.terminal_event(), &mut message);
        }

        let freed = {
            let mut forest = self.forest.lock();
            let mut freed = Vec::new();
            for r in &references {
                freed.extend(forest.unlink(*r));
                freed.extend(forest.release(*r));
            }
            freed
        };
        for r in &references {
            self.drop_contexts(*r);
        }
        drop(freed);
    }

    fn forward_abort(&self, parent: TimelineRef, acting: Priority, reason: Option<Arc<str>>) {
        let lower = self
            .forest
            .lock()
            .get(parent)
            .is_ok_and(|p| p.priority < acting);
        if !lower {
            return;
        }
        match self.terminate(parent, Action::Abort, Some(acting), reason) {
            Ok(()) => debug!(timeline = %parent, acting, "abort forwarded"),
            Err(e) => debug!(timeline = %parent, error = e.as_label(), "forwarded abort pending"),
        }
    }
}
