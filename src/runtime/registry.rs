//! Suite and test registry
//!
//! [`Declarations`] collects suites, tests and hooks while the script is
//! evaluated. It keeps an explicit stack of open suites so nested
//! declarations attach to the innermost one. [`Declarations::freeze`] hands
//! the result to the scheduler as a [`Registry`]; any declaration after that
//! point is rejected.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use futures_util::future::LocalBoxFuture;
use thiserror::Error;

use crate::ipc::protocol::{FailureDetail, LogEntry, TestStatus};

/// Name of the suite that collects top-level tests and hooks
pub const DEFAULT_SUITE: &str = "default";

/// Body of a test or hook
pub type Callable = Rc<dyn Fn() -> LocalBoxFuture<'static, Result<(), FailureDetail>>>;

/// Errors raised into the declaring script
#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Cannot declare {0} once tests have started running")]
    Frozen(&'static str),

    #[error("Invalid test status transition for '{name}': {from} -> {to}")]
    InvalidTransition {
        name: String,
        from: CaseStatus,
        to: CaseStatus,
    },
}

/// Index of a suite in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteId(pub usize);

/// Declaration modifier from `.skip` / `.only`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    Skip,
    Only,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
}

impl CaseStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Passed | Self::Failed | Self::Skipped => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// Wire status of a terminal state
    pub fn as_result(self) -> Option<TestStatus> {
        match self {
            Self::Passed => Some(TestStatus::Passed),
            Self::Failed => Some(TestStatus::Failed),
            Self::Skipped => Some(TestStatus::Skipped),
            Self::Pending | Self::Running => None,
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{}", name)
    }
}

/// Lifecycle hook slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    BeforeAll,
    AfterAll,
    BeforeEach,
    AfterEach,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BeforeAll => "beforeAll",
            Self::AfterAll => "afterAll",
            Self::BeforeEach => "beforeEach",
            Self::AfterEach => "afterEach",
        };
        write!(f, "{}", name)
    }
}

#[derive(Default, Clone)]
pub struct Hooks {
    pub before_all: Vec<Callable>,
    pub after_all: Vec<Callable>,
    pub before_each: Vec<Callable>,
    pub after_each: Vec<Callable>,
}

impl Hooks {
    fn slot(&mut self, kind: HookKind) -> &mut Vec<Callable> {
        match kind {
            HookKind::BeforeAll => &mut self.before_all,
            HookKind::AfterAll => &mut self.after_all,
            HookKind::BeforeEach => &mut self.before_each,
            HookKind::AfterEach => &mut self.after_each,
        }
    }
}

pub struct TestCase {
    pub name: String,
    pub body: Callable,
    pub timeout: Duration,
    pub suite: SuiteId,
    pub mode: Mode,
    /// Resolved at freeze from `.skip`/`.only` on the test and its suites
    pub skip: bool,
    status: CaseStatus,
    pub duration: u64,
    pub logs: Vec<LogEntry>,
    pub failure: Option<FailureDetail>,
}

impl TestCase {
    pub fn status(&self) -> CaseStatus {
        self.status
    }

    /// Move to a later lifecycle state; going backwards or leaving a
    /// terminal state is rejected
    pub fn transition(&mut self, next: CaseStatus) -> Result<(), RegistryError> {
        if next.rank() <= self.status.rank() {
            return Err(RegistryError::InvalidTransition {
                name: self.name.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

pub struct TestSuite {
    pub id: SuiteId,
    pub name: String,
    pub parent: Option<SuiteId>,
    pub tests: Vec<TestCase>,
    pub hooks: Hooks,
    pub mode: Mode,
    /// Suite-level errors (declaration, beforeAll, afterAll)
    pub errors: Vec<String>,
}

/// Registration state shared by the declaration globals
pub struct Declarations {
    suites: Vec<TestSuite>,
    stack: Vec<SuiteId>,
    default_suite: Option<SuiteId>,
    default_timeout: Duration,
    frozen: bool,
}

impl Declarations {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            suites: Vec::new(),
            stack: Vec::new(),
            default_suite: None,
            default_timeout,
            frozen: false,
        }
    }

    /// Open a suite; later declarations attach to it until it is closed
    pub fn open_suite(&mut self, name: &str, mode: Mode) -> Result<SuiteId, RegistryError> {
        if self.frozen {
            return Err(RegistryError::Frozen("a suite"));
        }
        let parent = self.stack.last().copied();
        let name = match parent {
            Some(parent) => format!("{} > {}", self.suites[parent.0].name, name),
            None => name.to_string(),
        };
        let id = self.push_suite(name, parent, mode);
        self.stack.push(id);
        tracing::trace!(suite = %self.suites[id.0].name, "Suite opened");
        Ok(id)
    }

    pub fn close_suite(&mut self, id: SuiteId) {
        if let Some(pos) = self.stack.iter().rposition(|s| *s == id) {
            self.stack.truncate(pos);
        }
    }

    /// Record an error thrown while declaring a suite's body
    pub fn record_error(&mut self, id: SuiteId, message: String) {
        if let Some(suite) = self.suites.get_mut(id.0) {
            suite.errors.push(message);
        }
    }

    pub fn add_test(
        &mut self,
        name: &str,
        body: Callable,
        timeout: Option<Duration>,
        mode: Mode,
    ) -> Result<(), RegistryError> {
        if self.frozen {
            return Err(RegistryError::Frozen("a test"));
        }
        let suite = self.current_suite();
        let timeout = timeout.unwrap_or(self.default_timeout);
        self.suites[suite.0].tests.push(TestCase {
            name: name.to_string(),
            body,
            timeout,
            suite,
            mode,
            skip: false,
            status: CaseStatus::Pending,
            duration: 0,
            logs: Vec::new(),
            failure: None,
        });
        Ok(())
    }

    pub fn add_hook(&mut self, kind: HookKind, hook: Callable) -> Result<(), RegistryError> {
        if self.frozen {
            return Err(RegistryError::Frozen("a hook"));
        }
        let suite = self.current_suite();
        self.suites[suite.0].hooks.slot(kind).push(hook);
        Ok(())
    }

    /// Stop accepting declarations and resolve skip/only into each test's
    /// `skip` flag
    pub fn freeze(&mut self) -> Registry {
        self.frozen = true;
        self.stack.clear();
        let mut suites = std::mem::take(&mut self.suites);

        let chains: Vec<Vec<SuiteId>> = (0..suites.len())
            .map(|i| ancestry(&suites, SuiteId(i)))
            .collect();
        let suite_mode = |suites: &[TestSuite], chain: &[SuiteId], mode: Mode| {
            chain.iter().any(|id| suites[id.0].mode == mode)
        };

        let focus = suites.iter().any(|s| {
            s.mode == Mode::Only || s.tests.iter().any(|t| t.mode == Mode::Only)
        });

        for i in 0..suites.len() {
            let skipped_suite = suite_mode(&suites, &chains[i], Mode::Skip);
            let focused_suite = suite_mode(&suites, &chains[i], Mode::Only);
            for test in &mut suites[i].tests {
                let focused = focused_suite || test.mode == Mode::Only;
                test.skip = skipped_suite || test.mode == Mode::Skip || (focus && !focused);
            }
        }

        Registry { suites }
    }

    fn push_suite(&mut self, name: String, parent: Option<SuiteId>, mode: Mode) -> SuiteId {
        let id = SuiteId(self.suites.len());
        self.suites.push(TestSuite {
            id,
            name,
            parent,
            tests: Vec::new(),
            hooks: Hooks::default(),
            mode,
            errors: Vec::new(),
        });
        id
    }

    fn current_suite(&mut self) -> SuiteId {
        if let Some(id) = self.stack.last() {
            return *id;
        }
        match self.default_suite {
            Some(id) => id,
            None => {
                let id = self.push_suite(DEFAULT_SUITE.to_string(), None, Mode::Normal);
                self.default_suite = Some(id);
                id
            }
        }
    }
}

/// Suite ids from the outermost ancestor down to `id`
fn ancestry(suites: &[TestSuite], id: SuiteId) -> Vec<SuiteId> {
    let mut chain = vec![id];
    let mut current = suites[id.0].parent;
    while let Some(parent) = current {
        chain.push(parent);
        current = suites[parent.0].parent;
    }
    chain.reverse();
    chain
}

/// Frozen, ordered registry handed to the scheduler
pub struct Registry {
    pub suites: Vec<TestSuite>,
}

impl Registry {
    pub fn suite_names(&self) -> Vec<String> {
        self.suites.iter().map(|s| s.name.clone()).collect()
    }

    /// Suite ids from the outermost ancestor down to `id`
    pub fn ancestry(&self, id: SuiteId) -> Vec<SuiteId> {
        ancestry(&self.suites, id)
    }
}
