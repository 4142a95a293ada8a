// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::new_without_default)]

//! Task identity and the supervision tree: linking, trapping, the halt cascade, and ensure hooks.
//!
//! A task's bookkeeping (`TaskInner`) is not generic over its result type, even though every task
//! in a tree produces a different type of value: following `graph::entry::Entry<N>`'s shape would
//! make the whole tree generic over one node type, which this runtime's heterogeneous trees can't
//! accept. Instead `TaskInner` is a plain struct holding a type-erased result slot, and `Task<T>`
//! is a thin typed wrapper around it — the same shape `tokio::task::JoinHandle<T>` uses over a
//! type-erased runtime task.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context as PollContext, Poll};

use parking_lot::Mutex;

pub use controller::{operation, promise, value, BodyOutcome};
use controller::Controller;
pub use frame::OperationError;
use frame::{Exit, Frame};
use state_machine::{StateMachine, TaskState, Trigger};

/// Allocates task ids unique within one runtime instance, rather than a process-wide static
/// counter (design notes: "avoid process-wide static state in library builds").
pub struct IdAllocator(AtomicU64);

impl IdAllocator {
    pub fn new() -> Arc<IdAllocator> {
        Arc::new(IdAllocator(AtomicU64::new(1)))
    }

    fn next(&self) -> TaskId {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

pub type TaskId = u64;

/// Per-task options (§3 `Task.options`).
#[derive(Clone, Default)]
pub struct TaskOptions {
    /// If true, a parent resolving normally waits for this child rather than halting it.
    pub block_parent: bool,
    /// If true, this child's own error does not propagate to its parent.
    pub ignore_error: bool,
    /// If true, this task ignores errors raised by any of its children.
    pub ignore_child_errors: bool,
    /// The scope a `resource`'s cleanup is registered against; defaults to the spawning task
    /// itself when unset (§4.5 "defaulting to the caller").
    pub resource_scope: Option<Scope>,
}

/// The shared context every task in one tree is constructed with: an id allocator and the
/// executor bodies are spawned onto. Cloned down from parent to child.
#[derive(Clone)]
pub struct TaskContext {
    pub ids: Arc<IdAllocator>,
    pub executor: rt_executor::Runtime,
}

/// What an external awaiter of a task observes once it reaches a terminal state.
#[derive(Debug)]
pub enum TaskError {
    Operation(OperationError),
    Halted,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Operation(e) => write!(f, "{e}"),
            TaskError::Halted => f.write_str("task was halted"),
        }
    }
}

impl std::error::Error for TaskError {}

/// An observable event on the supervision tree (§6 "Observability").
#[derive(Clone, Debug)]
pub enum Event {
    State(TaskState),
    Link(TaskId),
    Unlink(TaskId),
}

type Listener = Arc<dyn Fn(TaskId, &Event) + Send + Sync>;
type Trapper = Box<dyn Fn(Arc<TaskInner>) + Send + Sync>;
type EnsureHandler = Box<dyn FnOnce() + Send>;

/// Type-erased terminal outcome, independent of any task's result type — the piece that lets a
/// heterogeneous tree share one non-generic bookkeeping type.
enum Outcome {
    Completed,
    Errored(OperationError),
    Halted,
}

struct Finishing {
    force: bool,
}

/// The non-generic supervision node. `Scope` is the type bodies see when they call
/// `scope.spawn(...)`/`scope.ensure(...)`; it is exactly this type, shared (not copied) with the
/// task's entry in its parent's `children`.
pub struct TaskInner {
    id: TaskId,
    ctx: TaskContext,
    parent: Option<Weak<TaskInner>>,
    options: TaskOptions,
    frame: Arc<Frame>,
    state: Mutex<StateMachine>,
    finishing: Mutex<Option<Finishing>>,
    children: Mutex<Vec<Arc<TaskInner>>>,
    trappers: Mutex<Vec<Trapper>>,
    ensure_handlers: Mutex<Vec<EnsureHandler>>,
    observers: Mutex<Vec<Listener>>,
    error: Mutex<Option<OperationError>>,
    result_slot: Mutex<Option<Box<dyn Any + Send>>>,
    outcome_tx: Mutex<Option<deferred::DeferredSender<()>>>,
    outcome_rx: deferred::DeferredReceiver<()>,
    outcome: Mutex<Option<Outcome>>,
}

pub type Scope = Arc<TaskInner>;

/// A body bound to the scope it is about to run in, so it can call `scope.spawn`/`scope.ensure`
/// on itself — the author-facing half of `spawn`, `ensure`, and `resource` being "instructions"
/// (§6): in this runtime they are just methods a body calls on the `Scope` it is handed.
pub trait ScopedBody<T: Send + 'static>: Send + 'static {
    fn invoke(self: Box<Self>, scope: Scope) -> BodyOutcome<T>;
}

impl<T, F> ScopedBody<T> for F
where
    T: Send + 'static,
    F: FnOnce(Scope) -> BodyOutcome<T> + Send + 'static,
{
    fn invoke(self: Box<Self>, scope: Scope) -> BodyOutcome<T> {
        (*self)(scope)
    }
}

/// Lets callers collect heterogeneous bodies (different closures producing the same `T`) into one
/// `Vec<Box<dyn ScopedBody<T>>>`, which the combinators above `task` need for `race`/`all`.
impl<T: Send + 'static> ScopedBody<T> for Box<dyn ScopedBody<T>> {
    fn invoke(self: Box<Self>, scope: Scope) -> BodyOutcome<T> {
        (*self).invoke(scope)
    }
}

/// Adapts a `ScopedBody` into a plain `controller::Body` by closing over the scope it will run
/// in, which is only known once the owning `TaskInner` has been constructed.
struct BoundBody<T: Send + 'static> {
    scope: Scope,
    inner: Box<dyn ScopedBody<T>>,
}

impl<T: Send + 'static> controller::Body<T> for BoundBody<T> {
    fn invoke(self: Box<Self>) -> BodyOutcome<T> {
        self.inner.invoke(self.scope)
    }
}

impl fmt::Display for TaskInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{} ({})", self.id, self.state())
    }
}

impl TaskInner {
    fn new_raw(ctx: TaskContext, parent: Option<Weak<TaskInner>>, options: TaskOptions) -> Arc<TaskInner> {
        let (tx, rx) = deferred::new::<()>();
        Arc::new(TaskInner {
            id: ctx.ids.next(),
            ctx,
            parent,
            options,
            frame: Frame::new(),
            state: Mutex::new(StateMachine::new()),
            finishing: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            trappers: Mutex::new(Vec::new()),
            ensure_handlers: Mutex::new(Vec::new()),
            observers: Mutex::new(Vec::new()),
            error: Mutex::new(None),
            result_slot: Mutex::new(None),
            outcome_tx: Mutex::new(Some(tx)),
            outcome_rx: rx,
            outcome: Mutex::new(None),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state.lock().state()
    }

    pub fn options(&self) -> TaskOptions {
        self.options.clone()
    }

    pub fn describe(&self) -> String {
        self.to_string()
    }

    /// A fresh child of this task's own evaluator frame, for instructions (resource init) that
    /// need interrupt-racing and sub-frame draining without becoming a full supervised child task.
    pub fn child_frame(&self) -> Arc<Frame> {
        self.frame.child()
    }

    /// The task that spawned this one, if any. Children hold only this non-owning back-reference;
    /// the parent's `children` entry is what keeps a task alive.
    pub fn parent(&self) -> Option<Scope> {
        self.parent.as_ref()?.upgrade()
    }

    pub fn on(&self, listener: impl Fn(TaskId, &Event) + Send + Sync + 'static) {
        self.observers.lock().push(Arc::new(listener));
    }

    fn emit(&self, event: Event) {
        for listener in self.observers.lock().iter() {
            listener(self.id, &event);
        }
    }

    /// Registers a cleanup callback that fires, in registration order, once this task reaches a
    /// terminal state — before trappers (§4.3, §3 invariant 5).
    pub fn ensure(&self, handler: impl FnOnce() + Send + 'static) {
        self.ensure_handlers.lock().push(Box::new(handler));
    }

    /// Spawns a child task rooted at `self`, links it, and starts it.
    ///
    /// §7 ProgrammerError: calling `spawn` on a task that is not `running` is a bug in the
    /// caller, not a reason to abort the process — it rejects `self` with an `OperationError`
    /// describing the misuse and hands back a task that never ran a body, so `halted` is the only
    /// terminal state it can truthfully report.
    pub fn spawn<T, B>(self: &Arc<TaskInner>, body: B, options: TaskOptions) -> Task<T>
    where
        T: Send + 'static,
        B: ScopedBody<T>,
    {
        let state = self.state();
        if state != TaskState::Running {
            self.reject(OperationError::msg(format!(
                "spawn called on a task that is not running (state: {state})"
            )));
            return TaskInner::stillborn(self.ctx.clone());
        }
        let child = TaskInner::new_raw(self.ctx.clone(), Some(Arc::downgrade(self)), options);
        log::trace!("task {} spawning child {}", self.id, child.id);
        self.link(&child);
        let bound = BoundBody { scope: child.clone(), inner: Box::new(body) };
        child.start(Box::new(bound));
        Task::from_inner(child)
    }

    /// A task handle that is immediately `halted` without ever running a body: what a rejected
    /// `spawn` call (above) hands back, since nothing ever executes for it to complete or error
    /// with.
    fn stillborn<T: Send + 'static>(ctx: TaskContext) -> Task<T> {
        let task = TaskInner::new_raw(ctx, None, TaskOptions::default());
        {
            let mut sm = task.state.lock();
            sm.transition(Trigger::Halt).expect("halt from pending is always legal");
        }
        task.emit(Event::State(TaskState::Halting));
        {
            let mut sm = task.state.lock();
            sm.transition(Trigger::ChildrenDone)
                .expect("halting with no children always finishes");
        }
        task.emit(Event::State(TaskState::Halted));
        *task.outcome.lock() = Some(Outcome::Halted);
        if let Some(tx) = task.outcome_tx.lock().take() {
            tx.settle(());
        }
        Task::from_inner(task)
    }

    fn link(self: &Arc<TaskInner>, child: &Arc<TaskInner>) {
        let parent = self.clone();
        child.trappers.lock().push(Box::new(move |terminated_child: Arc<TaskInner>| {
            parent.trap(terminated_child);
        }));
        self.children.lock().push(child.clone());
        self.emit(Event::Link(child.id));
    }

    fn unlink(self: &Arc<TaskInner>, child: &Arc<TaskInner>) {
        self.children.lock().retain(|c| !Arc::ptr_eq(c, child));
        self.emit(Event::Unlink(child.id));
    }

    /// §4.3 trap: invoked once a linked child reaches a terminal state.
    fn trap(self: &Arc<TaskInner>, child: Arc<TaskInner>) {
        if child.state() == TaskState::Errored
            && !child.options.ignore_error
            && !self.options.ignore_child_errors
        {
            let err = child
                .error
                .lock()
                .clone()
                .expect("errored task has an error recorded");
            self.reject(err);
        }
        self.unlink(&child);
        self.resume();
    }

    /// Starts this task's body running. Called immediately after construction by `spawn` and by
    /// the root runner, so there is no externally observable window in which a `Pending` task
    /// could be halted before it starts; the state machine's `Pending -> Halting` edge exists for
    /// the halt-cascade's own internal use (halting a task whose body never got to run).
    fn start<T: Send + 'static>(self: &Arc<TaskInner>, body: Box<dyn controller::Body<T>>) {
        {
            let mut sm = self.state.lock();
            sm.transition(Trigger::Start)
                .expect("start on a freshly constructed task is always legal");
        }
        self.emit(Event::State(TaskState::Running));

        let this = self.clone();
        let _handle = self.ctx.executor.native_spawn(async move {
            let exit: Exit<T> = Controller::run(&this.frame, body).await;
            this.settle(exit);
        });
    }

    fn settle<T: Send + 'static>(self: &Arc<TaskInner>, exit: Exit<T>) {
        match exit {
            Exit::Completed(value) => {
                *self.result_slot.lock() = Some(Box::new(value));
                self.enter_finishing(Trigger::Resolve, false);
            }
            Exit::Failed(err) => self.reject(err),
            Exit::Aborted | Exit::Crashed(_) => {
                // Either path reaches the same terminal state from this task's own point of view:
                // halt is not an error to the halted task itself (§7).
                self.enter_finishing(Trigger::Halt, true);
            }
        }
        self.resume();
    }

    /// §4.3: a `reject` only takes effect from `running` or `completing` — the two states the
    /// state machine actually accepts it from. A `blockParent` child erroring while its parent is
    /// `completing` (waiting that child out) still lands here and forces `erroring`; anything
    /// else (already `erroring`/`halting`, or already terminal) has nowhere left to take the
    /// error, so it is logged and dropped rather than silently lost.
    fn reject(self: &Arc<TaskInner>, err: OperationError) {
        let state = self.state();
        if !matches!(state, TaskState::Running | TaskState::Completing) {
            log::warn!("task {} dropped a rejection while in {state}: {err}", self.id);
            return;
        }
        log::debug!("task {} rejected: {err}", self.id);
        *self.error.lock() = Some(err);
        self.enter_finishing(Trigger::Reject, true);
        self.resume();
    }

    fn enter_finishing(self: &Arc<TaskInner>, trigger: Trigger, force: bool) {
        let (prev, next) = {
            let mut sm = self.state.lock();
            let prev = sm.state();
            match sm.transition(trigger) {
                Ok(next) => (prev, next),
                // Already finishing/terminal (e.g. a concurrent halt raced a body failure): the
                // first transition wins, later ones are no-ops.
                Err(_) => return,
            }
        };
        if prev == next {
            // `halt` is idempotent at the state-machine level: a body settling into Aborted after
            // `halt()` already forced `halting` re-triggers this same no-op transition. The first
            // call already recorded `force` and kicked off the cascade.
            return;
        }
        *self.finishing.lock() = Some(Finishing { force });
        self.emit(Event::State(next));
        self.halt_next_child();
    }

    /// §4.3 `haltChildren(force)`: halts (at most) one child per call, walking in reverse
    /// insertion order. The next call happens via `resume`, driven by that child's own trap firing
    /// once it terminates — so halts proceed serially, one at a time.
    fn halt_next_child(self: &Arc<TaskInner>) {
        let Some(force) = self.finishing.lock().as_ref().map(|f| f.force) else {
            return;
        };
        let candidate = {
            let children = self.children.lock();
            children
                .iter()
                .rev()
                .find(|c| force || !c.options.block_parent)
                .cloned()
        };
        if let Some(child) = candidate {
            let _handle = self.ctx.executor.native_spawn(async move {
                child.halt().await;
            });
        }
    }

    /// Re-checked every time a child unlinks (via `trap`) and every time this task enters a
    /// finishing state. Advances to terminal once children is empty; otherwise keeps the halt
    /// cascade moving.
    fn resume(self: &Arc<TaskInner>) {
        let state = self.state();
        if !state.is_finishing() {
            return;
        }
        if self.children.lock().is_empty() {
            self.finish();
        } else {
            self.halt_next_child();
        }
    }

    /// §3 invariant 4/5: terminal state is entered only once children is empty, then ensure hooks
    /// fire in registration order, then trappers — each exactly once.
    fn finish(self: &Arc<TaskInner>) {
        let next = {
            let mut sm = self.state.lock();
            match sm.transition(Trigger::ChildrenDone) {
                Ok(next) => next,
                Err(_) => return,
            }
        };
        self.emit(Event::State(next));

        let outcome = match next {
            TaskState::Completed => Outcome::Completed,
            TaskState::Errored => Outcome::Errored(
                self.error.lock().clone().expect("errored task has an error recorded"),
            ),
            TaskState::Halted => Outcome::Halted,
            other => unreachable!("ChildrenDone transitioned to non-terminal state {other}"),
        };

        for handler in self.ensure_handlers.lock().drain(..).collect::<Vec<_>>() {
            handler();
        }

        *self.outcome.lock() = Some(outcome);
        if let Some(tx) = self.outcome_tx.lock().take() {
            tx.settle(());
        }

        let trappers = self.trappers.lock().drain(..).collect::<Vec<_>>();
        let self_arc = self.self_arc();
        for trapper in trappers {
            trapper(self_arc.clone());
        }
    }

    /// Reconstructs an `Arc<TaskInner>` pointing at `self` for handing to trappers, which expect
    /// the terminated child itself. Safe because every live `TaskInner` is always held by at
    /// least one `Arc` (its parent's `children` entry or the caller's `Task<T>`).
    fn self_arc(self: &Arc<TaskInner>) -> Arc<TaskInner> {
        self.clone()
    }

    /// Idempotent, eventually-terminal cooperative cancellation (§5). Forces `halting`, interrupts
    /// the in-flight body via the frame, force-halts children, and awaits this task's own terminal
    /// state.
    pub async fn halt(self: &Arc<TaskInner>) {
        let became_halting = {
            let cur = self.state();
            if cur.is_terminal() {
                return;
            }
            if cur == TaskState::Halting {
                false
            } else {
                // `halt` from `pending` has nothing to interrupt yet but still forces the state
                // and cascade; from running/completing/erroring it races the live body via Frame.
                let mut sm = self.state.lock();
                let _ = sm.transition(Trigger::Halt);
                true
            }
        };
        {
            let mut finishing = self.finishing.lock();
            match finishing.as_mut() {
                Some(f) => f.force = true,
                None => *finishing = Some(Finishing { force: true }),
            }
        }
        if became_halting {
            self.emit(Event::State(TaskState::Halting));
        }
        self.frame.destroy(None).await;
        self.halt_next_child();
        self.resume();
        let _ = self.outcome_rx.recv().await;
    }

    fn take_outcome(&self) -> Option<Outcome> {
        self.outcome.lock().take()
    }
}

/// A consumer-facing, single-owner handle to a spawned task's eventual result. Implements
/// `Future` so `task.await` mirrors "`await task` yields the task's result, rejects with its
/// error, or signals halt" (§6).
pub struct Task<T> {
    inner: Arc<TaskInner>,
    poll: Option<Pin<Box<dyn Future<Output = Result<T, TaskError>> + Send>>>,
}

impl<T: Send + 'static> Task<T> {
    fn from_inner(inner: Arc<TaskInner>) -> Task<T> {
        Task { inner, poll: None }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id()
    }

    pub fn state(&self) -> TaskState {
        self.inner.state()
    }

    pub fn describe(&self) -> String {
        self.inner.describe()
    }

    pub fn on(&self, listener: impl Fn(TaskId, &Event) + Send + Sync + 'static) {
        self.inner.on(listener);
    }

    pub async fn halt(&self) {
        self.inner.halt().await;
    }

    /// The `Scope` view of this task, for callers that need to `spawn`/`ensure` onto it directly
    /// (e.g. a resource's `init` registering cleanup on an outer scope).
    pub fn scope(&self) -> Scope {
        self.inner.clone()
    }

    /// Treats halt as a normal, empty outcome instead of a failure (§6 `catchHalt`).
    pub async fn catch_halt(self) -> Result<Option<T>, OperationError> {
        match await_outcome::<T>(self.inner).await {
            Ok(v) => Ok(Some(v)),
            Err(TaskError::Halted) => Ok(None),
            Err(TaskError::Operation(e)) => Err(e),
        }
    }
}

impl<T: Send + 'static> fmt::Display for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl<T: Send + 'static> Future for Task<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut PollContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.poll.is_none() {
            let inner = this.inner.clone();
            this.poll = Some(Box::pin(await_outcome::<T>(inner)));
        }
        this.poll.as_mut().expect("poll future just initialized").as_mut().poll(cx)
    }
}

async fn await_outcome<T: Send + 'static>(inner: Arc<TaskInner>) -> Result<T, TaskError> {
    inner.outcome_rx.recv().await;
    match inner.take_outcome().expect("outcome settled before the deferred fired") {
        Outcome::Completed => {
            let boxed = inner
                .result_slot
                .lock()
                .take()
                .expect("a Completed task always has a stored result");
            Ok(*boxed
                .downcast::<T>()
                .expect("Task<T> always downcasts to the T it was spawned with"))
        }
        Outcome::Errored(e) => Err(TaskError::Operation(e)),
        Outcome::Halted => Err(TaskError::Halted),
    }
}

/// Constructs and starts the root task of a tree.
pub fn spawn_root<T, B>(ctx: TaskContext, body: B, options: TaskOptions) -> Task<T>
where
    T: Send + 'static,
    B: ScopedBody<T>,
{
    let inner = TaskInner::new_raw(ctx, None, options);
    let bound = BoundBody { scope: inner.clone(), inner: Box::new(body) };
    inner.start(Box::new(bound));
    Task::from_inner(inner)
}
