use crate::error::{GraphicsError, GraphicsResult, violation};

/// Push/pop stack of saved device state. Popping an empty stack is a
/// caller bug and is reported instead of ignored.
#[derive(Debug)]
pub(crate) struct StateStack<T> {
    name: &'static str,
    saved: Vec<T>,
}

impl<T: Clone> StateStack<T> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            saved: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, value: T) {
        self.saved.push(value);
    }

    pub(crate) fn pop(&mut self) -> GraphicsResult<T> {
        self.saved.pop().ok_or_else(|| {
            violation(GraphicsError::ContextViolation(format!(
                "{} stack popped while empty",
                self.name
            )))
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.saved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_reverse_order_then_fails() -> GraphicsResult<()> {
        let mut stack = StateStack::new("viewport");
        stack.push(1);
        stack.push(2);
        assert_eq!(stack.pop()?, 2);
        assert_eq!(stack.pop()?, 1);
        assert!(matches!(stack.pop(), Err(GraphicsError::ContextViolation(_))));
        assert_eq!(stack.len(), 0);
        Ok(())
    }
}
