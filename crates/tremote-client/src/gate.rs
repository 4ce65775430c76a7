//! Holds RPC work submitted before the session is ready.
//!
//! While closed, submitted operations queue in FIFO order. Opening the gate
//! drains the queue exactly once against the live handle; after that,
//! submissions run immediately on the caller's thread. The lock is never held
//! while an operation runs, so an operation may submit further work.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use tremote_core::RemoteResult;

use crate::listeners::lock;
use crate::providers::ErrorReporter;
use crate::transport::RpcHandle;

/// Deferred work against a ready transport handle.
pub type RpcOp = Box<dyn FnOnce(&Arc<dyn RpcHandle>) -> RemoteResult<()> + Send>;

/// What happened to a submitted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Immediate,
    Queued,
}

#[derive(Default)]
struct GateState {
    rpc: Option<Arc<dyn RpcHandle>>,
    queue: VecDeque<RpcOp>,
    draining: bool,
}

pub struct PendingCallGate {
    state: Mutex<GateState>,
    reporter: Arc<dyn ErrorReporter>,
}

impl PendingCallGate {
    pub fn new(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            reporter,
        }
    }

    pub fn submit(&self, op: RpcOp) -> Submitted {
        let rpc = {
            let mut state = lock(&self.state);
            match &state.rpc {
                Some(rpc) if !state.draining => rpc.clone(),
                _ => {
                    state.queue.push_back(op);
                    debug!(queued = state.queue.len(), "rpc queued until ready");
                    return Submitted::Queued;
                }
            }
        };
        self.run(op, &rpc);
        Submitted::Immediate
    }

    /// Open the gate on `rpc` and drain everything queued so far.
    ///
    /// Returns the number of operations drained. Work submitted during the
    /// drain joins the back of the queue and is drained too.
    pub fn open(&self, rpc: Arc<dyn RpcHandle>) -> usize {
        {
            let mut state = lock(&self.state);
            state.rpc = Some(rpc.clone());
            state.draining = true;
        }

        let mut drained = 0;
        loop {
            let next = {
                let mut state = lock(&self.state);
                let next = state.queue.pop_front();
                if next.is_none() {
                    state.draining = false;
                }
                next
            };
            let Some(op) = next else { break };
            self.run(op, &rpc);
            drained += 1;
        }

        if drained > 0 {
            debug!(drained, "pending rpc queue drained");
        }
        drained
    }

    /// Close the gate again (transport replaced); queued work is kept.
    pub fn close(&self) {
        lock(&self.state).rpc = None;
    }

    /// Close the gate and drop all queued work.
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.rpc = None;
        state.queue.clear();
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).rpc.is_some()
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).queue.len()
    }

    fn run(&self, op: RpcOp, rpc: &Arc<dyn RpcHandle>) {
        match catch_unwind(AssertUnwindSafe(|| op(rpc))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "queued rpc failed");
                self.reporter.report("execute_rpc", &e.to_string());
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "rpc operation panicked".to_string());
                warn!(message = %message, "queued rpc panicked");
                self.reporter.report("execute_rpc", &message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeRpc, RecordingReporter};
    use tremote_core::RemoteError;

    fn recorder(log: &Arc<Mutex<Vec<u32>>>, n: u32) -> RpcOp {
        let log = log.clone();
        Box::new(move |_rpc| {
            lock(&log).push(n);
            Ok(())
        })
    }

    #[test]
    fn queued_ops_drain_in_order_then_run_immediately() {
        let reporter = Arc::new(RecordingReporter::default());
        let gate = PendingCallGate::new(reporter.clone());
        let log = Arc::new(Mutex::new(Vec::new()));

        for n in 1..=3 {
            assert_eq!(gate.submit(recorder(&log, n)), Submitted::Queued);
        }
        assert!(lock(&log).is_empty());

        assert_eq!(gate.open(FakeRpc::new().handle()), 3);
        assert_eq!(*lock(&log), vec![1, 2, 3]);
        assert_eq!(gate.pending(), 0);

        assert_eq!(gate.submit(recorder(&log, 4)), Submitted::Immediate);
        assert_eq!(*lock(&log), vec![1, 2, 3, 4]);
    }

    #[test]
    fn failing_op_does_not_abort_drain() {
        let reporter = Arc::new(RecordingReporter::default());
        let gate = PendingCallGate::new(reporter.clone());
        let log = Arc::new(Mutex::new(Vec::new()));

        gate.submit(recorder(&log, 1));
        gate.submit(Box::new(|_| Err(RemoteError::RpcFailure("boom".into()))));
        gate.submit(Box::new(|_| panic!("exploded")));
        gate.submit(recorder(&log, 4));

        assert_eq!(gate.open(FakeRpc::new().handle()), 4);
        assert_eq!(*lock(&log), vec![1, 4]);
        let reports = reporter.reports();
        assert_eq!(reports.len(), 2);
        assert!(reports[0].contains("boom"));
        assert!(reports[1].contains("exploded"));
    }

    #[test]
    fn op_submitted_during_drain_runs_after_queue() {
        let gate = Arc::new(PendingCallGate::new(Arc::new(RecordingReporter::default())));
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner_gate = gate.clone();
        let inner_log = log.clone();
        gate.submit(Box::new(move |_| {
            lock(&inner_log).push(1);
            inner_gate.submit(recorder(&inner_log, 3));
            Ok(())
        }));
        gate.submit(recorder(&log, 2));

        assert_eq!(gate.open(FakeRpc::new().handle()), 3);
        assert_eq!(*lock(&log), vec![1, 2, 3]);
    }

    #[test]
    fn second_open_does_not_replay() {
        let gate = PendingCallGate::new(Arc::new(RecordingReporter::default()));
        let log = Arc::new(Mutex::new(Vec::new()));
        gate.submit(recorder(&log, 1));
        gate.open(FakeRpc::new().handle());
        gate.close();
        assert_eq!(gate.open(FakeRpc::new().handle()), 0);
        assert_eq!(*lock(&log), vec![1]);
    }

    #[test]
    fn clear_drops_queued_work() {
        let gate = PendingCallGate::new(Arc::new(RecordingReporter::default()));
        let log = Arc::new(Mutex::new(Vec::new()));
        gate.submit(recorder(&log, 1));
        gate.clear();
        assert_eq!(gate.pending(), 0);
        assert!(!gate.is_open());
    }
}
