//! Frame layout and the operand stack mapping.
//!
//! Every value lives in an 8-byte frame slot below RBP. Slot `s` is at
//! `[rbp - 8*(s+1)]`, and slots are assigned in this order: parameters,
//! locals, operand stack (one slot per depth), one scratch slot.

use super::JitError;

/// Size of one frame slot.
pub const SLOT_SIZE: i32 = 8;

/// Slot assignment of one function frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    params: usize,
    locals: usize,
    max_stack: usize,
}

impl FrameLayout {
    pub fn new(params: usize, locals: usize, max_stack: usize) -> Self {
        Self {
            params,
            locals,
            max_stack,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.params + self.locals + self.max_stack + 1
    }

    /// Bytes reserved below RBP, rounded up to 16.
    pub fn frame_size(&self) -> i32 {
        let bytes = self.slot_count() as i32 * SLOT_SIZE;
        (bytes + 15) & !15
    }

    fn slot(slot: usize) -> i32 {
        -SLOT_SIZE * (slot as i32 + 1)
    }

    /// RBP-relative offset of parameter `index`.
    pub fn parameter(&self, index: usize) -> i32 {
        Self::slot(index)
    }

    /// RBP-relative offset of local `index`.
    pub fn local(&self, index: usize) -> i32 {
        Self::slot(self.params + index)
    }

    /// RBP-relative offset of the operand stack entry at `depth`.
    pub fn operand(&self, depth: usize) -> i32 {
        Self::slot(self.params + self.locals + depth)
    }

    /// RBP-relative offset of the scratch slot.
    pub fn scratch(&self) -> i32 {
        Self::slot(self.params + self.locals + self.max_stack)
    }

    pub fn max_stack(&self) -> usize {
        self.max_stack
    }
}

/// Operand stack tracker used while generating one instruction.
///
/// The depth is reset from the verifier's annotation at every instruction,
/// so all paths into an instruction agree on where each operand lives.
#[derive(Debug, Clone)]
pub struct OperandStack {
    layout: FrameLayout,
    depth: usize,
}

impl OperandStack {
    pub fn new(layout: FrameLayout) -> Self {
        Self { layout, depth: 0 }
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn reset(&mut self, depth: usize) -> Result<(), JitError> {
        if depth > self.layout.max_stack {
            return Err(JitError::Internal(format!(
                "operand depth {} exceeds the maximum of {}",
                depth, self.layout.max_stack
            )));
        }
        self.depth = depth;
        Ok(())
    }

    /// Reserve the next slot and return its offset.
    pub fn push(&mut self) -> Result<i32, JitError> {
        if self.depth >= self.layout.max_stack {
            return Err(JitError::Internal("operand stack overflow".to_string()));
        }
        let offset = self.layout.operand(self.depth);
        self.depth += 1;
        Ok(offset)
    }

    /// Release the top slot and return its offset.
    pub fn pop(&mut self) -> Result<i32, JitError> {
        if self.depth == 0 {
            return Err(JitError::Internal("operand stack underflow".to_string()));
        }
        self.depth -= 1;
        Ok(self.layout.operand(self.depth))
    }

    /// Release the top `count` slots, returning their offsets bottom first.
    pub fn pop_n(&mut self, count: usize) -> Result<Vec<i32>, JitError> {
        if self.depth < count {
            return Err(JitError::Internal("operand stack underflow".to_string()));
        }
        self.depth -= count;
        Ok((self.depth..self.depth + count)
            .map(|d| self.layout.operand(d))
            .collect())
    }

    /// Offset of the top slot without popping it.
    pub fn top(&self) -> Result<i32, JitError> {
        if self.depth == 0 {
            return Err(JitError::Internal("operand stack is empty".to_string()));
        }
        Ok(self.layout.operand(self.depth - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_order() {
        let layout = FrameLayout::new(2, 1, 3);
        assert_eq!(layout.parameter(0), -8);
        assert_eq!(layout.parameter(1), -16);
        assert_eq!(layout.local(0), -24);
        assert_eq!(layout.operand(0), -32);
        assert_eq!(layout.operand(2), -48);
        assert_eq!(layout.scratch(), -56);
        assert_eq!(layout.slot_count(), 7);
        assert_eq!(layout.frame_size(), 64);
    }

    #[test]
    fn test_frame_size_is_aligned() {
        assert_eq!(FrameLayout::new(0, 0, 0).frame_size(), 16);
        assert_eq!(FrameLayout::new(0, 0, 1).frame_size(), 16);
        assert_eq!(FrameLayout::new(1, 0, 1).frame_size(), 32);
    }

    #[test]
    fn test_push_pop() {
        let mut stack = OperandStack::new(FrameLayout::new(0, 0, 2));
        let a = stack.push().unwrap();
        let b = stack.push().unwrap();
        assert!(stack.push().is_err());
        assert_eq!(stack.top().unwrap(), b);
        assert_eq!(stack.pop().unwrap(), b);
        assert_eq!(stack.pop().unwrap(), a);
        assert!(stack.pop().is_err());
    }

    #[test]
    fn test_pop_n_bottom_first() {
        let mut stack = OperandStack::new(FrameLayout::new(1, 0, 3));
        stack.reset(3).unwrap();
        assert_eq!(stack.pop_n(2).unwrap(), vec![-24, -32]);
        assert_eq!(stack.depth(), 1);
        assert!(stack.reset(4).is_err());
    }
}
