//! Per-session transaction buffering.
//!
//! A transaction does not hold locks or versions: it simply queues the
//! session's INSERT/UPDATE/DELETE commands. COMMIT replays them in order
//! against the live executors; ROLLBACK drops them. SELECTs inside an open
//! transaction read the committed state only.

use parser::Command;

#[derive(Debug, Default)]
pub struct TransactionBuffer {
    ops: Vec<Command>,
}

impl TransactionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&mut self, command: Command) {
        self.ops.push(command);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<Command> {
        self.ops
    }
}

/// Commands that a transaction redirects into its buffer.
pub fn is_bufferable(command: &Command) -> bool {
    matches!(
        command,
        Command::Insert { .. } | Command::Update { .. } | Command::Delete { .. }
    )
}
