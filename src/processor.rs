//! Threaded processing graph.
//!
//! A [`Processor`] owns one worker thread, accepts a single in-flight input
//! and forwards each published output to its children. Inputs arriving while
//! the worker is busy are dropped and counted.

use crate::object::Object;
use crate::{MyntEyeError, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Node kind: how a processor builds its output and transforms an input.
pub trait Transform: Send + 'static {
    fn create_output(&self) -> Box<dyn Object>;

    /// Fill `output` from `input`. `Ok(false)` reports a declined input.
    fn process(
        &mut self,
        input: &dyn Object,
        output: &mut dyn Object,
        parent: Option<&Processor>,
    ) -> Result<bool>;
}

/// Closure-backed [`Transform`].
pub struct FnTransform<C, F> {
    create: C,
    process: F,
}

impl<C, F> FnTransform<C, F>
where
    C: Fn() -> Box<dyn Object> + Send + 'static,
    F: FnMut(&dyn Object, &mut dyn Object) -> Result<bool> + Send + 'static,
{
    pub fn new(create: C, process: F) -> Self {
        Self { create, process }
    }
}

impl<C, F> Transform for FnTransform<C, F>
where
    C: Fn() -> Box<dyn Object> + Send + 'static,
    F: FnMut(&dyn Object, &mut dyn Object) -> Result<bool> + Send + 'static,
{
    fn create_output(&self) -> Box<dyn Object> {
        (self.create)()
    }

    fn process(
        &mut self,
        input: &dyn Object,
        output: &mut dyn Object,
        _parent: Option<&Processor>,
    ) -> Result<bool> {
        (self.process)(input, output)
    }
}

pub type PreProcessCallback = Arc<dyn Fn(&dyn Object) + Send + Sync>;
pub type PostProcessCallback = Arc<dyn Fn(&dyn Object) + Send + Sync>;
/// Tried before the node's own transform; the transform runs only on `Ok(false)`.
pub type ProcessCallback =
    Arc<dyn Fn(&dyn Object, &mut dyn Object, Option<&Processor>) -> Result<bool> + Send + Sync>;

#[derive(Default, Clone)]
struct Hooks {
    pre: Option<PreProcessCallback>,
    post: Option<PostProcessCallback>,
    process: Option<ProcessCallback>,
}

struct Input {
    ready: bool,
    value: Option<Box<dyn Object>>,
}

struct State {
    idle: bool,
    dropped: u64,
}

struct Core {
    name: String,
    period: Duration,
    activated: AtomicBool,
    input: Mutex<Input>,
    input_ready: Condvar,
    state: Mutex<State>,
    result: Mutex<Option<Box<dyn Object>>>,
    processed: AtomicU64,
    failed: AtomicU64,
    hooks: Mutex<Hooks>,
    transform: Mutex<Box<dyn Transform>>,
    parent: Mutex<Weak<Processor>>,
    children: Mutex<Vec<Arc<Processor>>>,
}

/// One stage of a processing graph.
///
/// Children are owned; the parent link is a weak back-reference used only to
/// cascade activation. Dropping a processor deactivates it.
pub struct Processor {
    core: Arc<Core>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Processor {
    /// Create an inactive processor. A non-zero `period` is the minimum time
    /// between the starts of successive iterations.
    pub fn new(name: impl Into<String>, transform: impl Transform, period: Duration) -> Arc<Self> {
        Arc::new(Self {
            core: Arc::new(Core {
                name: name.into(),
                period,
                activated: AtomicBool::new(false),
                input: Mutex::new(Input {
                    ready: false,
                    value: None,
                }),
                input_ready: Condvar::new(),
                state: Mutex::new(State {
                    idle: true,
                    dropped: 0,
                }),
                result: Mutex::new(None),
                processed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                hooks: Mutex::new(Hooks::default()),
                transform: Mutex::new(Box::new(transform)),
                parent: Mutex::new(Weak::new()),
                children: Mutex::new(Vec::new()),
            }),
            thread: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn add_child(self: &Arc<Self>, child: Arc<Processor>) {
        *lock(&child.core.parent) = Arc::downgrade(self);
        lock(&self.core.children).push(child);
    }

    pub fn remove_child(&self, child: &Arc<Processor>) {
        let mut children = lock(&self.core.children);
        let before = children.len();
        children.retain(|c| !Arc::ptr_eq(c, child));
        if children.len() != before {
            *lock(&child.core.parent) = Weak::new();
        }
    }

    pub fn children(&self) -> Vec<Arc<Processor>> {
        lock(&self.core.children).clone()
    }

    pub fn parent(&self) -> Option<Arc<Processor>> {
        lock(&self.core.parent).upgrade()
    }

    /// Visit this processor and then every descendant, depth-first.
    pub fn walk(self: &Arc<Self>, f: &mut dyn FnMut(&Arc<Processor>)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    pub fn set_pre_process_callback(&self, callback: Option<PreProcessCallback>) {
        lock(&self.core.hooks).pre = callback;
    }

    pub fn set_post_process_callback(&self, callback: Option<PostProcessCallback>) {
        lock(&self.core.hooks).post = callback;
    }

    pub fn set_process_callback(&self, callback: Option<ProcessCallback>) {
        lock(&self.core.hooks).process = callback;
    }

    /// Start the worker. With `parents`, every ancestor is activated first.
    pub fn activate(&self, parents: bool) -> Result<()> {
        if self.is_activated() {
            return Ok(());
        }
        if parents {
            let mut parent = self.parent();
            while let Some(p) = parent {
                p.activate(false)?;
                parent = p.parent();
            }
        }

        let mut thread = lock(&self.thread);
        if thread.is_some() {
            return Ok(());
        }
        {
            let mut input = lock(&self.core.input);
            input.ready = false;
            input.value = None;
        }
        lock(&self.core.state).idle = true;
        self.core.activated.store(true, Ordering::SeqCst);

        let core = self.core.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("mynteye-{}", self.core.name))
            .spawn(move || core.run());
        match spawned {
            Ok(handle) => {
                *thread = Some(handle);
                log::debug!("{} activated", self.core.name);
                Ok(())
            }
            Err(e) => {
                self.core.activated.store(false, Ordering::SeqCst);
                Err(MyntEyeError::Spawn(e))
            }
        }
    }

    /// Stop the worker and wait for it to exit. With `children`, every
    /// descendant is deactivated first.
    pub fn deactivate(&self, children: bool) {
        if !self.is_activated() {
            return;
        }
        if children {
            for child in self.children() {
                child.walk(&mut |p| p.deactivate(false));
            }
        }

        let handle = lock(&self.thread).take();
        {
            let _state = lock(&self.core.state);
            let mut input = lock(&self.core.input);
            self.core.activated.store(false, Ordering::SeqCst);
            input.ready = true;
        }
        self.core.input_ready.notify_all();

        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                log::warn!("{} deactivated from its own worker, not joining", self.core.name);
                return;
            }
            if handle.join().is_err() {
                log::error!("{} worker panicked", self.core.name);
            }
        }
        log::debug!("{} deactivated", self.core.name);
    }

    pub fn is_activated(&self) -> bool {
        self.core.activated.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        lock(&self.core.state).idle
    }

    /// Offer `input` to the worker. Returns whether it was accepted.
    ///
    /// Rejected when inactive, busy with a previous input, or when `input`
    /// is no longer valid. Accepted inputs are copied before returning.
    pub fn process(&self, input: &dyn Object) -> bool {
        {
            let mut state = lock(&self.core.state);
            if !self.is_activated() {
                state.dropped += 1;
                log::trace!("{} not activated, dropped {}", self.core.name, state.dropped);
                return false;
            }
            if !state.idle {
                state.dropped += 1;
                log::trace!("{} busy, dropped {}", self.core.name, state.dropped);
                return false;
            }
            if !input.dec_validity() {
                state.dropped += 1;
                log::warn!("{} process with invalid input", self.core.name);
                return false;
            }
            state.idle = false;

            // Filled under the state lock so a concurrent deactivate either
            // sees this input or rejects it.
            let mut slot = lock(&self.core.input);
            slot.value = Some(input.clone_object());
            slot.ready = true;
        }
        self.core.input_ready.notify_all();
        true
    }

    /// Copy of the last published output, if any.
    pub fn output(&self) -> Option<Box<dyn Object>> {
        lock(&self.core.result).as_ref().map(|o| o.clone_object())
    }

    /// Take the last published output; later calls return `None` until the
    /// next one is published.
    pub fn take_output(&self) -> Option<Box<dyn Object>> {
        lock(&self.core.result).take()
    }

    /// Inputs rejected because the node was inactive, the worker was busy or
    /// the input was invalid.
    pub fn dropped_count(&self) -> u64 {
        lock(&self.core.state).dropped
    }

    pub fn processed_count(&self) -> u64 {
        self.core.processed.load(Ordering::Relaxed)
    }

    /// Iterations whose transform declined or failed.
    pub fn failed_count(&self) -> u64 {
        self.core.failed.load(Ordering::Relaxed)
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        self.deactivate(false);
    }
}

impl Core {
    fn set_idle(&self, idle: bool) {
        lock(&self.state).idle = idle;
    }

    fn run(&self) {
        log::debug!("{} thread start", self.name);
        let mut output: Option<Box<dyn Object>> = None;
        let mut last_begin: Option<Instant> = None;

        loop {
            let input = {
                let mut slot = lock(&self.input);
                while !slot.ready {
                    slot = self
                        .input_ready
                        .wait(slot)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                slot.ready = false;
                if !self.activated.load(Ordering::SeqCst) {
                    slot.value = None;
                    drop(slot);
                    self.set_idle(true);
                    break;
                }
                slot.value.take()
            };
            let Some(input) = input else {
                continue;
            };

            let begin = Instant::now();
            if self.run_once(input.as_ref(), &mut output) {
                self.processed.fetch_add(1, Ordering::Relaxed);
            } else {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            self.set_idle(true);
            self.pace(begin, &mut last_begin);
        }
        log::debug!("{} thread end", self.name);
    }

    fn run_once(&self, input: &dyn Object, output: &mut Option<Box<dyn Object>>) -> bool {
        let hooks = lock(&self.hooks).clone();
        let parent = lock(&self.parent).upgrade();
        let parent = parent.as_deref();

        let out = {
            let mut transform = lock(&self.transform);
            let out = output.get_or_insert_with(|| transform.create_output());

            if let Some(pre) = &hooks.pre {
                pre(input);
            }
            let result = match &hooks.process {
                Some(callback) => match callback(input, out.as_mut(), parent) {
                    Ok(true) => Ok(true),
                    Ok(false) => transform.process(input, out.as_mut(), parent),
                    Err(e) => Err(e),
                },
                None => transform.process(input, out.as_mut(), parent),
            };
            match result {
                Ok(true) => out,
                Ok(false) => {
                    log::debug!("{} process failed", self.name);
                    return false;
                }
                Err(e) => {
                    log::error!("{} process error \"{}\"", self.name, e.to_string().trim_end());
                    return false;
                }
            }
        };

        if let Some(post) = &hooks.post {
            post(out.as_ref());
        }
        *lock(&self.result) = Some(out.clone_object());

        let children = lock(&self.children).clone();
        for child in children {
            child.process(out.as_ref());
        }
        true
    }

    /// Sleep out the rest of the period, measured from the previous
    /// iteration's start.
    fn pace(&self, begin: Instant, last_begin: &mut Option<Instant>) {
        if self.period.is_zero() {
            log::trace!("{} process cost {:?}", self.name, begin.elapsed());
            return;
        }
        let since = last_begin.replace(begin).unwrap_or(begin);
        let elapsed = since.elapsed();
        match self.period.checked_sub(elapsed) {
            Some(rest) if !rest.is_zero() => {
                log::trace!(
                    "{} process cost {:?}, sleep {:?}",
                    self.name,
                    begin.elapsed(),
                    rest
                );
                std::thread::sleep(rest);
            }
            _ => log::trace!("{} process cost {:?}", self.name, begin.elapsed()),
        }
    }
}
