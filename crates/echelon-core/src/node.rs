//! The status node: one entry of a progress tree.
//!
//! A [`StatusNode`] is a cheap, cloneable handle to shared state. Workers keep
//! a clone to mutate the node while a parent holds another clone in its
//! children list, and a redraw loop calls [`StatusNode::draw`] on the root.
//!
//! Every node guards its own state with a reader/writer lock. No operation
//! ever holds two nodes' locks at once: [`StatusNode::draw`] copies what it
//! needs from a node, releases the lock, and only then descends into the
//! children. Rendering a whole tree is therefore not atomic, but it never
//! blocks mutation of any other node.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::color::{AnsiColor, ColorError, colorize};
use crate::duration::format_duration;
use crate::gate::CompletionGate;
use crate::snapshot::NodeSnapshot;

/// Description cap used by [`StatusNode::start`].
pub const DEFAULT_MAX_DESCRIPTION_LINES: usize = 5;

/// Indentation added per tree level.
const INDENT: &str = "  ";

/// Errors reported by node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A completion call on a node that had already completed.
    #[error("node '{title}' is already completed")]
    AlreadyCompleted { title: String },

    #[error(transparent)]
    InvalidColor(#[from] ColorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    Completed { ended_at: Instant },
}

#[derive(Debug)]
struct NodeState {
    title: String,
    title_color: Option<AnsiColor>,
    description: VecDeque<String>,
    started_at: Instant,
    lifecycle: Lifecycle,
    children: Vec<StatusNode>,
}

impl NodeState {
    fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    fn execution_duration(&self) -> Duration {
        match self.lifecycle {
            Lifecycle::Running => self.started_at.elapsed(),
            Lifecycle::Completed { ended_at } => ended_at.duration_since(self.started_at),
        }
    }

    /// `[-] title 1.2s` while running, `[+] title 1.2s` once completed.
    fn header(&self, colored: bool) -> String {
        let prefix = if self.is_running() { "[-]" } else { "[+]" };
        let duration = format_duration(self.execution_duration());
        if colored {
            format!(
                "{} {} {}",
                prefix,
                colorize(&self.title, self.title_color),
                duration
            )
        } else {
            format!("{} {} {}", prefix, self.title, duration)
        }
    }
}

#[derive(Debug)]
struct NodeInner {
    state: RwLock<NodeState>,
    done: CompletionGate,
    max_description_lines: usize,
}

/// Handle to one node of a progress tree.
///
/// Clones share the same node. A node's children are the handles passed to
/// [`add_child`](Self::add_child); children never point back at their parent.
/// Attaching a node to its own subtree makes rendering recurse forever, so
/// callers must keep the structure a tree.
#[derive(Debug, Clone)]
pub struct StatusNode {
    inner: Arc<NodeInner>,
}

impl StatusNode {
    /// Start a running node with the default description cap.
    pub fn start(title: impl Into<String>) -> Self {
        Self::start_with_max_lines(title, DEFAULT_MAX_DESCRIPTION_LINES)
    }

    /// Start a running node that keeps at most `max_description_lines`
    /// appended description lines.
    pub fn start_with_max_lines(title: impl Into<String>, max_description_lines: usize) -> Self {
        let title = title.into();
        debug!(title = %title, max_description_lines, "node started");
        Self {
            inner: Arc::new(NodeInner {
                state: RwLock::new(NodeState {
                    title,
                    title_color: None,
                    description: VecDeque::new(),
                    started_at: Instant::now(),
                    lifecycle: Lifecycle::Running,
                    children: Vec::new(),
                }),
                done: CompletionGate::new(),
                max_description_lines,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, NodeState> {
        // Every write leaves the state consistent, so a poisoned lock is still usable.
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, NodeState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn title(&self) -> String {
        self.read().title.clone()
    }

    pub fn title_color(&self) -> Option<AnsiColor> {
        self.read().title_color
    }

    pub fn description(&self) -> Vec<String> {
        self.read().description.iter().cloned().collect()
    }

    pub fn children(&self) -> Vec<StatusNode> {
        self.read().children.clone()
    }

    pub fn max_description_lines(&self) -> usize {
        self.inner.max_description_lines
    }

    /// Replace the title. Allowed before and after completion.
    pub fn update_title(&self, text: impl Into<String>) {
        self.write().title = text.into();
    }

    /// Replace the whole description.
    ///
    /// The line cap is not applied here; it is only enforced by
    /// [`append_description`](Self::append_description).
    pub fn set_description(&self, lines: Vec<String>) {
        self.write().description = VecDeque::from(lines);
    }

    pub fn clear_description(&self) {
        self.set_description(Vec::new());
    }

    /// Append one line, evicting the oldest lines beyond the cap.
    pub fn append_description(&self, text: impl Into<String>) {
        let max = self.inner.max_description_lines;
        let mut state = self.write();
        state.description.push_back(text.into());
        while state.description.len() > max {
            state.description.pop_front();
        }
    }

    /// Attach `child` as the last child of this node.
    pub fn add_child(&self, child: StatusNode) {
        self.write().children.push(child);
    }

    pub fn is_running(&self) -> bool {
        self.read().is_running()
    }

    /// Time since start while running; frozen at completion afterwards.
    pub fn execution_duration(&self) -> Duration {
        self.read().execution_duration()
    }

    /// Mark the node completed without a title color.
    pub fn complete(&self) -> Result<(), NodeError> {
        self.complete_with_color(None::<AnsiColor>)
    }

    /// Mark the node completed and color its title.
    ///
    /// A node completes exactly once. Later calls leave the node untouched
    /// and return [`NodeError::AlreadyCompleted`].
    pub fn complete_with_color(&self, color: impl Into<Option<AnsiColor>>) -> Result<(), NodeError> {
        let color = color.into();
        {
            let mut state = self.write();
            if !state.is_running() {
                let title = state.title.clone();
                drop(state);
                warn!(title = %title, "node completed more than once");
                return Err(NodeError::AlreadyCompleted { title });
            }
            state.lifecycle = Lifecycle::Completed {
                ended_at: Instant::now(),
            };
            state.title_color = color;
            let elapsed_ms = state.execution_duration().as_millis() as u64;
            debug!(title = %state.title, elapsed_ms, color = ?color, "node completed");
        }
        self.inner.done.release();
        Ok(())
    }

    /// Complete with a raw ANSI color code: negative for none, `0..=7` for a color.
    ///
    /// An out-of-range code is rejected before the node changes state.
    pub fn complete_with_code(&self, code: i32) -> Result<(), NodeError> {
        let color = AnsiColor::from_code(code)?;
        self.complete_with_color(color)
    }

    /// Block the current thread until this node completes.
    ///
    /// Does not wait for children. Blocks forever if the node never completes.
    pub fn wait(&self) {
        self.inner.done.wait();
    }

    /// Async counterpart of [`wait`](Self::wait).
    pub async fn wait_async(&self) {
        self.inner.done.wait_async().await;
    }

    /// Render this subtree, one terminal row per element, with ANSI colors.
    pub fn draw(&self) -> Vec<String> {
        self.render(true)
    }

    /// Render this subtree without any escape sequences.
    pub fn draw_plain(&self) -> Vec<String> {
        self.render(false)
    }

    fn render(&self, colored: bool) -> Vec<String> {
        let (header, children, description) = {
            let state = self.read();
            let header = state.header(colored);
            if state.children.is_empty() {
                let description: Vec<String> = state.description.iter().cloned().collect();
                (header, Vec::new(), description)
            } else {
                (header, state.children.clone(), Vec::new())
            }
        };

        let mut lines = Vec::with_capacity(1 + description.len());
        lines.push(header);
        if children.is_empty() {
            lines.extend(description.into_iter().map(|line| format!("{INDENT}{line}")));
        } else {
            for child in &children {
                lines.extend(
                    child
                        .render(colored)
                        .into_iter()
                        .map(|line| format!("{INDENT}{line}")),
                );
            }
        }
        lines
    }

    /// Capture a serializable copy of this subtree.
    pub fn snapshot(&self) -> NodeSnapshot {
        let (mut snapshot, children) = {
            let state = self.read();
            let snapshot = NodeSnapshot {
                title: state.title.clone(),
                color: state.title_color,
                running: state.is_running(),
                duration_ms: state.execution_duration().as_millis() as u64,
                description: state.description.iter().cloned().collect(),
                children: Vec::new(),
            };
            (snapshot, state.children.clone())
        };
        snapshot.children = children.iter().map(StatusNode::snapshot).collect();
        snapshot
    }
}
