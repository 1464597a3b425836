/// Call stack and dependency tree for nested annotation invocations
///
/// Every invocation enters a frame; nested invocations made while rendering a
/// definition become children of the current frame. When a frame exits, its
/// quest and all of the dependencies it accumulated are appended to the parent
/// frame, so the outermost frame ends up with the flattened, transitive list.
use std::cell::RefCell;

use crate::error::{Error, Result};
use crate::quest::Quest;

/// One node of the dependency tree
#[derive(Debug, Clone)]
pub struct Frame {
    pub quest: Quest,
    /// Flattened dependencies, one entry per occurrence
    pub dependencies: Vec<Quest>,
    children: Vec<usize>,
}

impl Frame {
    fn new(quest: Quest) -> Self {
        Self {
            quest,
            dependencies: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// Per-context stack of active frames plus the tree they form
#[derive(Debug, Default)]
pub struct CallStack {
    nodes: Vec<Frame>,
    stack: Vec<usize>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame, attaching it under the current top if there is one
    pub fn enter(&mut self, quest: Quest) {
        let idx = self.nodes.len();
        if let Some(&top) = self.stack.last() {
            self.nodes[top].children.push(idx);
        }
        self.nodes.push(Frame::new(quest));
        self.stack.push(idx);
    }

    /// Pop the top frame and fold it into its parent
    ///
    /// When the last frame exits the tree is reset.
    pub fn exit(&mut self) -> Result<Frame> {
        let idx = self.stack.pop().ok_or(Error::EmptyCallStack)?;
        let frame = self.nodes[idx].clone();

        match self.stack.last() {
            Some(&top) => {
                let parent = &mut self.nodes[top];
                parent.dependencies.push(frame.quest.clone());
                parent.dependencies.extend(frame.dependencies.iter().cloned());
            }
            None => self.nodes.clear(),
        }

        Ok(frame)
    }

    /// Pop the top frame without folding it into its parent
    ///
    /// Used when the invocation produced no result.
    pub fn abandon(&mut self) -> Result<Frame> {
        let idx = self.stack.pop().ok_or(Error::EmptyCallStack)?;
        let frame = self.nodes[idx].clone();

        match self.stack.last() {
            Some(&top) => self.nodes[top].children.retain(|&child| child != idx),
            None => self.nodes.clear(),
        }

        Ok(frame)
    }

    pub fn current(&self) -> Result<&Frame> {
        self.stack
            .last()
            .map(|&idx| &self.nodes[idx])
            .ok_or(Error::EmptyCallStack)
    }

    fn current_mut(&mut self) -> Result<&mut Frame> {
        let idx = *self.stack.last().ok_or(Error::EmptyCallStack)?;
        Ok(&mut self.nodes[idx])
    }

    /// Replace the current frame with a result served from a cache
    ///
    /// The cached quest carries the concrete version that produced the
    /// result, and its recorded dependencies stand in for the nested calls
    /// that were not re-executed.
    pub fn record_hit(&mut self, quest: Quest, dependencies: Vec<Quest>) -> Result<()> {
        let frame = self.current_mut()?;
        frame.quest = quest;
        frame.dependencies = dependencies;
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Root of the current tree, if an invocation is active
    pub fn root(&self) -> Option<&Frame> {
        self.nodes.first()
    }

    /// Direct children of a frame in the current tree
    pub fn children<'a>(&'a self, frame: &'a Frame) -> impl Iterator<Item = &'a Frame> + 'a {
        frame.children.iter().map(move |&idx| &self.nodes[idx])
    }
}

/// Scoped frame: enters on creation, exits exactly once
///
/// Dropping the guard without calling [`FrameGuard::finish`] still exits the
/// frame, so an error propagating out of a nested invocation never leaves a
/// dangling frame in the caller's tree.
pub struct FrameGuard<'a> {
    stack: &'a RefCell<CallStack>,
    exited: bool,
}

impl<'a> FrameGuard<'a> {
    pub fn enter(stack: &'a RefCell<CallStack>, quest: Quest) -> Self {
        stack.borrow_mut().enter(quest);
        Self {
            stack,
            exited: false,
        }
    }

    /// Dependencies accumulated so far by this frame
    pub fn dependencies(&self) -> Result<Vec<Quest>> {
        Ok(self.stack.borrow().current()?.dependencies.clone())
    }

    pub fn record_hit(&self, quest: Quest, dependencies: Vec<Quest>) -> Result<()> {
        self.stack.borrow_mut().record_hit(quest, dependencies)
    }

    /// Exit the frame, returning it with its final dependency list
    pub fn finish(mut self) -> Result<Frame> {
        self.exited = true;
        self.stack.borrow_mut().exit()
    }

    /// Exit the frame without recording it in the parent
    pub fn abandon(mut self) -> Result<Frame> {
        self.exited = true;
        self.stack.borrow_mut().abandon()
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if !self.exited {
            if let Ok(mut stack) = self.stack.try_borrow_mut() {
                let _ = stack.exit();
            }
        }
    }
}
