//! The runtime engine.
//!
//! [`Machine`] owns the tree-shared context and a [`MachineCore`]: one
//! node per declared state, the active configuration (one state per
//! region), the deferred and message queues, and the history tracker.
//! Dispatch walks the definition's shared dispatch table; all reentrancy
//! is modeled through the message queue, never through recursion.

pub(crate) mod history;
pub(crate) mod node;
pub(crate) mod queue;

pub use history::HistoryPolicy;
pub use queue::QueueOrder;

use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, error, trace};

use crate::core::{
    ActionError, DirectEnter, Envelope, Event, EventCtx, EventSource, Flag, FlagKey, Handled,
    InterruptFlag, Starting, StateId, Stopping, TerminateFlag, TypeKey,
};
use crate::table::{
    ActionFn, Chain, DispatchTable, FlagCell, FlagTable, MachineDef, ResolvedTarget, Row, RowExec,
};

use history::HistoryTracker;
use node::{Node, NodeKind};
use queue::DeferredQueue;

/// View of one state handed to visitors.
pub struct StateRef<'a> {
    /// The state's id within its own machine.
    pub id: StateId,
    /// The registered name (state type name, or the nested machine's name).
    pub name: &'a str,
    /// The user state value, when the state is a plain state.
    pub data: Option<&'a dyn Any>,
}

/// A running state machine instance.
///
/// Created from a shared [`MachineDef`]; owns the context `C` threaded
/// through every nested machine in the tree.
pub struct Machine<C> {
    pub(crate) core: MachineCore<C>,
    pub(crate) context: C,
}

impl<C: 'static> Machine<C> {
    /// Create an instance of `def` owning `context`.
    pub fn new(def: Arc<MachineDef<C>>, context: C) -> Self {
        Self {
            core: MachineCore::new(&def, false),
            context,
        }
    }

    /// Start the machine: enter the initial (or history-restored)
    /// configuration with a [`Starting`] event.
    pub fn start(&mut self) -> Result<(), ActionError> {
        self.start_with(Starting)
    }

    /// Start the machine with a caller-supplied event.
    pub fn start_with<E: Event>(&mut self, event: E) -> Result<(), ActionError> {
        if self.core.running {
            return Ok(());
        }
        self.core.enter(&mut self.context, &Envelope::new(event))
    }

    /// Stop the machine: exit the active configuration with a
    /// [`Stopping`] event.
    pub fn stop(&mut self) -> Result<(), ActionError> {
        self.stop_with(Stopping)
    }

    /// Stop the machine with a caller-supplied event.
    pub fn stop_with<E: Event>(&mut self, event: E) -> Result<(), ActionError> {
        if !self.core.running {
            return Ok(());
        }
        self.core.exit(&mut self.context, &Envelope::new(event))
    }

    /// Dispatch an event to the active configuration.
    pub fn process_event<E: Event>(&mut self, event: E) -> Result<Handled, ActionError> {
        self.core
            .process_event_internal(&mut self.context, &Envelope::new(event), EventSource::DIRECT)
    }

    /// Raise an event *directly on* a nested machine, as if a caller held
    /// a reference to it. Unmatched events raised this way report
    /// no-transition on the nested machine itself rather than propagating
    /// to this one.
    pub fn process_event_on<E: Event>(
        &mut self,
        submachine: StateId,
        event: E,
    ) -> Result<Handled, ActionError> {
        self.core
            .process_on_submachine(&mut self.context, submachine, &Envelope::new(event))
    }

    /// Append an event to the message queue without processing it.
    pub fn enqueue_event<E: Event>(&mut self, event: E) {
        self.core.queue.push_back(Envelope::new(event));
    }

    /// Process queued events until the message queue is empty.
    pub fn process_queued_events(&mut self) -> Result<(), ActionError> {
        self.core.drain_queued(&mut self.context)
    }

    /// Process a single queued event. Returns [`Handled::False`] when the
    /// queue is empty.
    pub fn process_single_queued_event(&mut self) -> Result<Handled, ActionError> {
        match self.core.queue.pop_front() {
            Some(envelope) => self.core.process_event_internal(
                &mut self.context,
                &envelope,
                EventSource::DIRECT | EventSource::MSG_QUEUE,
            ),
            None => Ok(Handled::False),
        }
    }

    /// Park an event in the deferred queue at the current sequence number.
    pub fn defer_event<E: Event>(&mut self, event: E) {
        self.core.deferred.push(Envelope::new(event));
    }

    /// The active configuration: one state id per region.
    pub fn get_active_state_ids(&self) -> &[StateId] {
        &self.core.active
    }

    /// Whether `start` has run and `stop` has not.
    pub fn is_running(&self) -> bool {
        self.core.running
    }

    /// Whether a state registered with type `S` is active, searching
    /// nested machines recursively.
    pub fn is_state_active<S: 'static>(&self) -> bool {
        self.core.state_active_by_type(TypeId::of::<S>())
    }

    /// Whether flag `F` is active in the current configuration. Multiple
    /// regions fold with OR.
    pub fn is_flag_active<F: Flag>(&self) -> bool {
        self.core
            .flag_active_key(FlagKey::of::<F>(), F::FORWARD_TO_SUBMACHINES)
    }

    /// Whether flag `F` is active, folding regions with `op`.
    pub fn is_flag_active_with<F: Flag>(&self, op: impl Fn(bool, bool) -> bool) -> bool {
        self.core
            .flag_fold(FlagKey::of::<F>(), F::FORWARD_TO_SUBMACHINES, &op)
    }

    /// Visit the active states, optionally recursing into nested machines.
    pub fn visit_active(&self, recursive: bool, visitor: &mut dyn FnMut(StateRef<'_>)) {
        self.core.visit_active(recursive, visitor);
    }

    /// Visit every declared state, optionally recursing into nested
    /// machines.
    pub fn visit_all(&self, recursive: bool, visitor: &mut dyn FnMut(StateRef<'_>)) {
        self.core.visit_all(recursive, visitor);
    }

    /// The shared context.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// The shared context, mutably.
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// The definition this instance was created from.
    pub fn def(&self) -> &Arc<MachineDef<C>> {
        &self.core.def
    }

    /// Number of events currently parked in the deferred queue.
    pub fn deferred_len(&self) -> usize {
        self.core.deferred.len()
    }

    /// Number of events currently waiting in the message queue.
    pub fn queued_len(&self) -> usize {
        self.core.queue.len()
    }
}

impl<C: Clone + 'static> Clone for Machine<C> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            context: self.context.clone(),
        }
    }
}

impl<C: 'static> fmt::Debug for Machine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("name", &self.core.def.name)
            .field("running", &self.core.running)
            .field("active", &self.core.active)
            .finish_non_exhaustive()
    }
}

/// The engine state of one machine level: nodes, configuration, queues.
/// Nested machines are `MachineCore`s owned by composite nodes; only the
/// root core pairs with a context inside a [`Machine`].
pub(crate) struct MachineCore<C> {
    pub(crate) def: Arc<MachineDef<C>>,
    pub(crate) table: Arc<DispatchTable<C>>,
    pub(crate) nodes: Vec<Node<C>>,
    pub(crate) active: SmallVec<[StateId; 2]>,
    pub(crate) history: HistoryTracker,
    pub(crate) deferred: DeferredQueue,
    pub(crate) queue: VecDeque<Envelope>,
    /// Exit-point events waiting to bubble up to the containing machine.
    pub(crate) forwards: Vec<Envelope>,
    pub(crate) event_processing: bool,
    pub(crate) running: bool,
    pub(crate) contained: bool,
}

impl<C: 'static> Clone for MachineCore<C> {
    fn clone(&self) -> Self {
        Self {
            def: Arc::clone(&self.def),
            table: Arc::clone(&self.table),
            nodes: self.nodes.clone(),
            active: self.active.clone(),
            history: self.history.clone(),
            deferred: self.deferred.clone(),
            queue: self.queue.clone(),
            forwards: self.forwards.clone(),
            event_processing: self.event_processing,
            running: self.running,
            contained: self.contained,
        }
    }
}

impl<C: 'static> MachineCore<C> {
    pub(crate) fn new(def: &Arc<MachineDef<C>>, contained: bool) -> Self {
        let table = def.dispatch_table();
        let nodes = def.seeds.iter().map(Node::from_seed).collect();
        let active = def.initial.clone();
        let history = HistoryTracker::new(def.history.clone(), &def.initial);
        Self {
            def: Arc::clone(def),
            table,
            nodes,
            active,
            history,
            deferred: DeferredQueue::default(),
            queue: VecDeque::new(),
            forwards: Vec::new(),
            event_processing: false,
            running: false,
            contained,
        }
    }

    // ---- event processing -------------------------------------------------

    pub(crate) fn process_event_internal(
        &mut self,
        ctx: &mut C,
        envelope: &Envelope,
        source: EventSource,
    ) -> Result<Handled, ActionError> {
        if self.def.has_blocking {
            if self.flag_active_key(FlagKey::of::<TerminateFlag>(), true) {
                trace!(machine = %self.def.name, event = %envelope.type_key(), "terminated, event swallowed");
                return Ok(Handled::True);
            }
            if self.flag_active_key(FlagKey::of::<InterruptFlag>(), true)
                && !self.is_end_interrupt(envelope.type_key())
            {
                trace!(machine = %self.def.name, event = %envelope.type_key(), "interrupted, event swallowed");
                return Ok(Handled::True);
            }
        }

        // Reentrancy guard: while another event is mid-processing, new
        // events queue up and are optimistically reported as handled.
        if self.event_processing {
            trace!(machine = %self.def.name, event = %envelope.type_key(), "busy, event queued");
            self.queue.push_back(envelope.clone());
            return Ok(Handled::True);
        }

        if self.is_event_deferred(envelope.type_key()) {
            debug!(machine = %self.def.name, event = %envelope.type_key(), "event deferred");
            self.deferred.push(envelope.clone());
            return Ok(Handled::Deferred);
        }

        self.event_processing = true;
        let outcome = self.do_process_event(ctx, envelope, source);
        self.event_processing = false;

        let handled = match outcome {
            Ok(handled) => handled,
            Err(err) => {
                let Some(hook) = self.def.action_error_hook.clone() else {
                    return Err(err);
                };
                error!(machine = %self.def.name, event = %envelope.type_key(), error = %err, "action failed");
                hook(envelope, ctx, &err);
                Handled::False
            }
        };

        // Completion transitions run before anything waiting in the pools.
        self.try_process_completion(ctx, source, handled)?;

        match self.def.queue_order {
            QueueOrder::DeferredFirst => {
                if !source.contains(EventSource::DEFERRED) {
                    self.try_process_deferred(ctx)?;
                    if !source.contains(EventSource::MSG_QUEUE) {
                        self.drain_queued(ctx)?;
                    }
                }
            }
            QueueOrder::MessageFirst => {
                if !source.contains(EventSource::MSG_QUEUE) {
                    self.drain_queued(ctx)?;
                    if !source.contains(EventSource::DEFERRED) {
                        self.try_process_deferred(ctx)?;
                    }
                }
            }
        }

        Ok(handled)
    }

    fn do_process_event(
        &mut self,
        ctx: &mut C,
        envelope: &Envelope,
        source: EventSource,
    ) -> Result<Handled, ActionError> {
        if source.contains(EventSource::DIRECT) {
            self.deferred.bump_seq();
        }

        let table = Arc::clone(&self.table);
        let mut handled = Handled::False;
        for region in 0..self.active.len() {
            let state = self.active[region];
            let regional = self.dispatch_on_state(ctx, &table, region, state, envelope)?;
            handled = handled.merge(regional);
        }

        // The machine's own internal table, for events it declares.
        if self.def.internal_events.contains(&envelope.type_key()) {
            if let Some(chain) = table.internal().chains.get(&envelope.type_key()) {
                let internal = self.walk_chain(ctx, chain, 0, envelope)?;
                handled = handled.merge(internal);
            }
        }

        // Contained machines leave unmatched events to their container,
        // unless the event was raised directly on them. Completion events
        // never count as errors.
        if handled == Handled::False
            && (!self.contained || source.contains(EventSource::DIRECT))
            && !self.def.is_completion(envelope.type_key())
        {
            self.report_no_transition(ctx, envelope);
        }

        Ok(handled)
    }

    fn dispatch_on_state(
        &mut self,
        ctx: &mut C,
        table: &DispatchTable<C>,
        region: usize,
        state: StateId,
        envelope: &Envelope,
    ) -> Result<Handled, ActionError> {
        let state_table = table.slot(state.index() + 1);

        // Composite states get the first shot at the event.
        if state_table.call_submachine {
            let handled = self.call_submachine(ctx, state, envelope)?;
            if handled != Handled::False {
                return Ok(handled);
            }
        }

        match state_table.chains.get(&envelope.type_key()) {
            Some(chain) => self.walk_chain(ctx, chain, region, envelope),
            None => Ok(Handled::False),
        }
    }

    fn walk_chain(
        &mut self,
        ctx: &mut C,
        chain: &Chain<C>,
        region: usize,
        envelope: &Envelope,
    ) -> Result<Handled, ActionError> {
        let mut result = Handled::False;
        for row in chain.rows.iter() {
            let handled = self.execute_row(ctx, region, row, envelope)?;
            result = result.chain(handled);
            if result.stops_chain() {
                break;
            }
        }
        Ok(result)
    }

    fn execute_row(
        &mut self,
        ctx: &mut C,
        region: usize,
        row: &Row<C>,
        envelope: &Envelope,
    ) -> Result<Handled, ActionError> {
        match &row.exec {
            RowExec::External {
                source,
                exit_check,
                target,
            } => {
                // A transition out of a pseudo exit point only fires while
                // that exit point is active inside the owning submachine.
                if let Some(exit) = exit_check {
                    if !self.submachine_exit_active(*source, *exit) {
                        return Ok(Handled::False);
                    }
                }
                if let Some(guard) = &row.guard {
                    if !guard(ctx, envelope) {
                        return Ok(Handled::GuardReject);
                    }
                }
                trace!(
                    machine = %self.def.name,
                    event = %envelope.type_key(),
                    from = %source,
                    to = %target.dispatch_id(),
                    "transition"
                );
                let source = *source;
                let new_active = target.dispatch_id();

                self.exit_node(ctx, source, envelope)?;
                self.run_action(ctx, row, envelope)?;
                match target {
                    ResolvedTarget::State(id) => {
                        self.enter_node(ctx, *id, envelope)?;
                    }
                    ResolvedTarget::Composite {
                        owner,
                        targets,
                        via_entry_point,
                    } => {
                        let wrapped = Envelope::new(DirectEnter {
                            targets: targets.clone(),
                            via_entry_point: *via_entry_point,
                            inner: envelope.clone(),
                        });
                        self.enter_node(ctx, *owner, &wrapped)?;
                    }
                }
                self.active[region] = new_active;
                Ok(Handled::True)
            }
            RowExec::Internal { .. } | RowExec::MachineInternal => {
                if let Some(guard) = &row.guard {
                    if !guard(ctx, envelope) {
                        return Ok(Handled::GuardReject);
                    }
                }
                self.run_action(ctx, row, envelope)?;
                Ok(Handled::True)
            }
        }
    }

    fn run_action(
        &mut self,
        ctx: &mut C,
        row: &Row<C>,
        envelope: &Envelope,
    ) -> Result<(), ActionError> {
        let Some(action) = &row.action else {
            return Ok(());
        };
        let action = Arc::clone(action);
        self.run_callback(ctx, envelope, |event_ctx, env| action(event_ctx, env))
    }

    /// Run a user callback, then absorb whatever it raised or deferred.
    fn run_callback(
        &mut self,
        ctx: &mut C,
        envelope: &Envelope,
        callback: impl FnOnce(&mut EventCtx<'_, C>, &Envelope) -> Result<(), ActionError>,
    ) -> Result<(), ActionError> {
        let mut raised = Vec::new();
        let mut deferrals = Vec::new();
        let result = {
            let mut event_ctx = EventCtx::new(ctx, &mut raised, &mut deferrals);
            callback(&mut event_ctx, envelope)
        };
        self.queue.extend(raised);
        for deferral in deferrals {
            self.deferred.push(deferral);
        }
        result
    }

    // ---- entry / exit -----------------------------------------------------

    /// Enter this machine level: restore history or the initial
    /// configuration (unless overridden by a direct-entry event), run the
    /// entry cascade, then settle queued and deferred events.
    pub(crate) fn enter(&mut self, ctx: &mut C, envelope: &Envelope) -> Result<(), ActionError> {
        self.event_processing = true;
        let result = self.enter_inner(ctx, envelope);
        self.event_processing = false;
        result?;
        self.try_process_deferred(ctx)?;
        self.drain_queued(ctx)?;
        Ok(())
    }

    fn enter_inner(&mut self, ctx: &mut C, envelope: &Envelope) -> Result<(), ActionError> {
        self.active = self.history.on_entry(envelope.type_key()).clone();

        if let Some(direct) = envelope.downcast::<DirectEnter>().cloned() {
            // Direct entry overrides history/initial in the targeted
            // regions only.
            for (region, state) in &direct.targets {
                self.active[region.index()] = *state;
            }
            self.internal_start(ctx, &direct.inner)?;
            if direct.via_entry_point {
                // Re-process the trigger inside this machine so the entry
                // point's outgoing transition fires. The reentrancy guard
                // parks it in the message queue until entry settles.
                self.process_event_internal(ctx, &direct.inner, EventSource::DIRECT)?;
            }
            Ok(())
        } else {
            self.internal_start(ctx, envelope)
        }
    }

    fn internal_start(&mut self, ctx: &mut C, envelope: &Envelope) -> Result<(), ActionError> {
        self.running = true;
        debug!(machine = %self.def.name, event = %envelope.type_key(), "starting");
        if let Some(hook) = self.def.entry_hook.clone() {
            self.run_hook(ctx, &hook, envelope)?;
        }
        for id in self.active.clone() {
            self.enter_node(ctx, id, envelope)?;
        }
        // Give eventless transitions a chance right after entry.
        self.try_process_completion(ctx, EventSource::DEFAULT, Handled::True)
    }

    /// Exit this machine level: cascade exits through the active states,
    /// snapshot history, and let the history policy decide the fate of
    /// still-deferred events.
    pub(crate) fn exit(&mut self, ctx: &mut C, envelope: &Envelope) -> Result<(), ActionError> {
        for id in self.active.clone() {
            self.exit_node(ctx, id, envelope)?;
        }
        if let Some(hook) = self.def.exit_hook.clone() {
            self.run_hook(ctx, &hook, envelope)?;
        }
        self.history.on_exit(&self.active);
        if !self.history.keeps_deferred_events(envelope.type_key()) {
            self.deferred.clear();
        }
        self.running = false;
        debug!(machine = %self.def.name, event = %envelope.type_key(), "stopped");
        Ok(())
    }

    fn run_hook(
        &mut self,
        ctx: &mut C,
        hook: &ActionFn<C>,
        envelope: &Envelope,
    ) -> Result<(), ActionError> {
        self.run_callback(ctx, envelope, |event_ctx, env| hook(event_ctx, env))
    }

    fn enter_node(&mut self, ctx: &mut C, id: StateId, envelope: &Envelope) -> Result<(), ActionError> {
        let mut raised = Vec::new();
        let mut deferrals = Vec::new();
        let mut forward = None;

        let result = match &mut self.nodes[id.index()].kind {
            NodeKind::State(slot) => {
                let mut event_ctx = EventCtx::new(ctx, &mut raised, &mut deferrals);
                // Direct-entry wrappers unwrap to the original event for
                // plain states.
                match envelope.downcast::<DirectEnter>() {
                    Some(direct) => slot.on_entry(&direct.inner, &mut event_ctx),
                    None => slot.on_entry(envelope, &mut event_ctx),
                }
            }
            NodeKind::Machine(core) => core.enter(ctx, envelope),
            NodeKind::Entry(_) => Ok(()),
            NodeKind::Exit(expected) => {
                // Entering an exit point forwards the trigger to the
                // containing machine.
                if envelope.type_key() == *expected {
                    forward = Some(envelope.clone());
                } else {
                    debug!(
                        machine = %self.def.name,
                        event = %envelope.type_key(),
                        expected = %expected,
                        "exit point entered with a non-forwardable event"
                    );
                }
                Ok(())
            }
        };

        self.queue.extend(raised);
        for deferral in deferrals {
            self.deferred.push(deferral);
        }
        if let Some(envelope) = forward {
            self.record_forward(envelope);
        }
        self.collect_forwards(id);
        result
    }

    fn exit_node(&mut self, ctx: &mut C, id: StateId, envelope: &Envelope) -> Result<(), ActionError> {
        let mut raised = Vec::new();
        let mut deferrals = Vec::new();

        let result = match &mut self.nodes[id.index()].kind {
            NodeKind::State(slot) => {
                let mut event_ctx = EventCtx::new(ctx, &mut raised, &mut deferrals);
                slot.on_exit(envelope, &mut event_ctx)
            }
            NodeKind::Machine(core) => {
                if core.running {
                    core.exit(ctx, envelope)
                } else {
                    Ok(())
                }
            }
            NodeKind::Entry(_) | NodeKind::Exit(_) => Ok(()),
        };

        self.queue.extend(raised);
        for deferral in deferrals {
            self.deferred.push(deferral);
        }
        // Forwards that never fired die with the exit.
        if let NodeKind::Machine(core) = &mut self.nodes[id.index()].kind {
            core.forwards.clear();
        }
        result
    }

    // ---- composite plumbing ----------------------------------------------

    fn call_submachine(
        &mut self,
        ctx: &mut C,
        state: StateId,
        envelope: &Envelope,
    ) -> Result<Handled, ActionError> {
        let handled = match &mut self.nodes[state.index()].kind {
            NodeKind::Machine(core) => {
                core.process_event_internal(ctx, envelope, EventSource::DEFAULT)?
            }
            _ => Handled::False,
        };
        self.collect_forwards(state);
        Ok(handled)
    }

    fn process_on_submachine(
        &mut self,
        ctx: &mut C,
        state: StateId,
        envelope: &Envelope,
    ) -> Result<Handled, ActionError> {
        let handled = match self.nodes.get_mut(state.index()).map(|node| &mut node.kind) {
            Some(NodeKind::Machine(core)) => {
                core.process_event_internal(ctx, envelope, EventSource::DIRECT)?
            }
            _ => {
                debug!(machine = %self.def.name, state = %state, "not a submachine");
                return Ok(Handled::False);
            }
        };
        self.collect_forwards(state);
        // Exit-point forwards triggered by the direct call are processed
        // right away, exactly as if the nested machine had called back in.
        if !self.event_processing {
            self.drain_queued(ctx)?;
        }
        Ok(handled)
    }

    fn submachine_exit_active(&self, owner: StateId, exit: StateId) -> bool {
        self.nodes[owner.index()]
            .submachine()
            .is_some_and(|core| core.active.contains(&exit))
    }

    /// Move a nested machine's pending exit-point forwards into this
    /// level's routing.
    fn collect_forwards(&mut self, id: StateId) {
        let forwards = match &mut self.nodes[id.index()].kind {
            NodeKind::Machine(core) if !core.forwards.is_empty() => {
                std::mem::take(&mut core.forwards)
            }
            _ => return,
        };
        for envelope in forwards {
            self.record_forward(envelope);
        }
    }

    /// Route one forwarded exit event: bubble further up from contained
    /// machines, process through the message queue at the root.
    fn record_forward(&mut self, envelope: Envelope) {
        trace!(machine = %self.def.name, event = %envelope.type_key(), "exit point forward");
        if self.contained {
            self.forwards.push(envelope);
        } else {
            self.queue.push_back(envelope);
        }
    }

    // ---- queues -----------------------------------------------------------

    fn try_process_completion(
        &mut self,
        ctx: &mut C,
        source: EventSource,
        handled: Handled,
    ) -> Result<(), ActionError> {
        if !handled.is_handled() {
            return Ok(());
        }
        let envelope = match &self.def.completion {
            Some(completion) => (completion.make)(),
            None => return Ok(()),
        };
        self.process_event_internal(ctx, &envelope, source | EventSource::DIRECT)?;
        Ok(())
    }

    /// Replay deferred events older than the current sequence. A replay
    /// that changes the configuration restarts the scan from the front;
    /// records parked during this pass are never reconsidered.
    fn try_process_deferred(&mut self, ctx: &mut C) -> Result<(), ActionError> {
        if self.deferred.is_empty() {
            return Ok(());
        }
        let mut snapshot = self.active.clone();
        let mut index = 0;
        loop {
            let (seq, key) = match self.deferred.record(index) {
                Some(record) => (record.seq, record.event.type_key()),
                None => break,
            };
            if seq == self.deferred.current_seq() {
                break;
            }
            if self.is_event_deferred(key) {
                index += 1;
                continue;
            }
            let Some(record) = self.deferred.remove(index) else {
                break;
            };
            let result = self.process_event_internal(ctx, &record.event, EventSource::DEFERRED)?;
            if result == Handled::True && self.active != snapshot {
                snapshot = self.active.clone();
                index = 0;
            }
        }
        Ok(())
    }

    pub(crate) fn drain_queued(&mut self, ctx: &mut C) -> Result<(), ActionError> {
        while let Some(envelope) = self.queue.pop_front() {
            self.process_event_internal(
                ctx,
                &envelope,
                EventSource::DIRECT | EventSource::MSG_QUEUE,
            )?;
        }
        Ok(())
    }

    // ---- queries ----------------------------------------------------------

    /// Whether the current configuration defers this event type. Consults
    /// the active states of this level only; nested machines consult
    /// their own configurations when the event reaches them.
    fn is_event_deferred(&self, key: TypeKey) -> bool {
        self.active
            .iter()
            .any(|&id| self.nodes[id.index()].meta.deferred.contains(&key))
    }

    fn is_end_interrupt(&self, key: TypeKey) -> bool {
        self.active.iter().any(|&id| {
            let node = &self.nodes[id.index()];
            if node.meta.interrupt_end == Some(key) {
                return true;
            }
            match &node.kind {
                NodeKind::Machine(core) => core.is_end_interrupt(key),
                _ => false,
            }
        })
    }

    fn report_no_transition(&mut self, ctx: &mut C, envelope: &Envelope) {
        let hook = self.def.no_transition.clone();
        for state in self.active.clone() {
            match &hook {
                Some(hook) => hook(envelope, ctx, state),
                None => debug!(
                    machine = %self.def.name,
                    event = %envelope.type_key(),
                    state = %state,
                    "no transition"
                ),
            }
        }
    }

    pub(crate) fn state_active_by_type(&self, wanted: TypeId) -> bool {
        if !self.running {
            return false;
        }
        self.active.iter().any(|&id| {
            let node = &self.nodes[id.index()];
            if node.meta.type_id == Some(wanted) {
                return true;
            }
            match &node.kind {
                NodeKind::Machine(core) => core.state_active_by_type(wanted),
                _ => false,
            }
        })
    }

    /// OR-fold of a flag over the active regions.
    pub(crate) fn flag_active_key(&self, key: FlagKey, forward: bool) -> bool {
        self.flag_fold(key, forward, &|a, b| a || b)
    }

    pub(crate) fn flag_fold(
        &self,
        key: FlagKey,
        forward: bool,
        op: &dyn Fn(bool, bool) -> bool,
    ) -> bool {
        let table = self.def.flag_table();
        let mut regions = self.active.iter();
        let first = match regions.next() {
            Some(&state) => self.flag_value(&table, key, state, forward),
            None => return false,
        };
        regions.fold(first, |acc, &state| {
            op(acc, self.flag_value(&table, key, state, forward))
        })
    }

    fn flag_value(&self, table: &FlagTable, key: FlagKey, state: StateId, forward: bool) -> bool {
        match table.cell(key, state) {
            FlagCell::Active => true,
            FlagCell::Inactive => false,
            FlagCell::Forward => {
                if !forward {
                    return false;
                }
                // Nested machines fold their own regions with OR.
                self.nodes[state.index()]
                    .submachine()
                    .is_some_and(|core| core.flag_active_key(key, forward))
            }
        }
    }

    pub(crate) fn visit_active(&self, recursive: bool, visitor: &mut dyn FnMut(StateRef<'_>)) {
        if !self.running {
            return;
        }
        for &id in &self.active {
            let node = &self.nodes[id.index()];
            visitor(Self::state_ref(id, node));
            if recursive {
                if let NodeKind::Machine(core) = &node.kind {
                    core.visit_active(recursive, visitor);
                }
            }
        }
    }

    pub(crate) fn visit_all(&self, recursive: bool, visitor: &mut dyn FnMut(StateRef<'_>)) {
        for (index, node) in self.nodes.iter().enumerate() {
            visitor(Self::state_ref(StateId::new(index as u16), node));
            if recursive {
                if let NodeKind::Machine(core) = &node.kind {
                    core.visit_all(recursive, visitor);
                }
            }
        }
    }

    fn state_ref<'a>(id: StateId, node: &'a Node<C>) -> StateRef<'a> {
        StateRef {
            id,
            name: &node.meta.name,
            data: match &node.kind {
                NodeKind::State(slot) => Some(slot.as_any()),
                _ => None,
            },
        }
    }
}
