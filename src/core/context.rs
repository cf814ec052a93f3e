//! The execution argument handed to actions and entry/exit callbacks.

use super::event::{Envelope, Event};

/// Access to the machine's shared context plus the two ways a callback may
/// raise further events.
///
/// The engine is single-threaded and non-preemptive: a callback can never
/// dispatch an event inline while another event is mid-processing.
/// [`post`](EventCtx::post) therefore appends to the owning machine's
/// message queue (drained, in FIFO order, once the current event's effects
/// have fully settled) and [`defer`](EventCtx::defer) parks an event in
/// the deferred queue at the current sequence number (retried no earlier
/// than the next externally-raised event).
pub struct EventCtx<'a, C> {
    ctx: &'a mut C,
    raised: &'a mut Vec<Envelope>,
    deferrals: &'a mut Vec<Envelope>,
}

impl<'a, C> EventCtx<'a, C> {
    pub(crate) fn new(
        ctx: &'a mut C,
        raised: &'a mut Vec<Envelope>,
        deferrals: &'a mut Vec<Envelope>,
    ) -> Self {
        Self {
            ctx,
            raised,
            deferrals,
        }
    }

    /// Shared context of the machine tree.
    pub fn context(&self) -> &C {
        self.ctx
    }

    /// Mutable shared context of the machine tree.
    pub fn context_mut(&mut self) -> &mut C {
        self.ctx
    }

    /// Raise an event. It is processed after the current event's effects
    /// (including completion transitions) have settled, in FIFO order
    /// relative to other raised events.
    pub fn post<E: Event>(&mut self, event: E) {
        self.raised.push(Envelope::new(event));
    }

    /// Park an event in the deferred queue. It is reconsidered once the
    /// next externally-raised event arrives.
    pub fn defer<E: Event>(&mut self, event: E) {
        self.deferrals.push(Envelope::new(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct Tick;

    #[test]
    fn post_and_defer_collect_envelopes() {
        let mut count = 0usize;
        let mut raised = Vec::new();
        let mut deferrals = Vec::new();
        {
            let mut ctx = EventCtx::new(&mut count, &mut raised, &mut deferrals);
            *ctx.context_mut() += 1;
            ctx.post(Tick);
            ctx.post(Tick);
            ctx.defer(Tick);
            assert_eq!(*ctx.context(), 1);
        }
        assert_eq!(raised.len(), 2);
        assert_eq!(deferrals.len(), 1);
        assert!(raised[0].is::<Tick>());
    }
}
