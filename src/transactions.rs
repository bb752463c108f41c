use crate::protocol::{Command, RedisError};

/// A session's queued-command buffer between `MULTI` and `EXEC`/`DISCARD`.
/// Grounded on `internal/transactions/transactions.go`, adapted from a
/// global id-keyed map to a value owned directly by the session it belongs
/// to — there's exactly one of these per connection, so the lookup the Go
/// original needs is unnecessary here.
#[derive(Default)]
pub struct Transaction {
    queued: Option<Vec<Command>>,
}

impl Transaction {
    pub fn new() -> Self {
        Self { queued: None }
    }

    pub fn is_active(&self) -> bool {
        self.queued.is_some()
    }

    pub fn begin(&mut self) -> Result<(), RedisError> {
        if self.is_active() {
            return Err(RedisError::NestedMulti);
        }
        self.queued = Some(Vec::new());
        Ok(())
    }

    pub fn queue(&mut self, command: Command) -> Result<(), RedisError> {
        match &mut self.queued {
            Some(commands) => {
                commands.push(command);
                Ok(())
            }
            None => Err(RedisError::ExecWithoutMulti),
        }
    }

    /// Ends the transaction and returns its queued commands in insertion
    /// order, for the caller to dispatch and collect replies for.
    pub fn take_for_exec(&mut self) -> Result<Vec<Command>, RedisError> {
        self.queued.take().ok_or(RedisError::ExecWithoutMulti)
    }

    pub fn discard(&mut self) -> Result<(), RedisError> {
        self.queued.take().map(|_| ()).ok_or(RedisError::DiscardWithoutMulti)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_then_nested_begin_fails() {
        let mut tx = Transaction::new();
        tx.begin().unwrap();
        assert!(matches!(tx.begin(), Err(RedisError::NestedMulti)));
    }

    #[test]
    fn queue_without_begin_fails() {
        let mut tx = Transaction::new();
        assert!(matches!(
            tx.queue(Command::Ping { message: None }),
            Err(RedisError::ExecWithoutMulti)
        ));
    }

    #[test]
    fn exec_without_multi_fails() {
        let mut tx = Transaction::new();
        assert!(matches!(
            tx.take_for_exec(),
            Err(RedisError::ExecWithoutMulti)
        ));
    }

    #[test]
    fn queue_preserves_insertion_order() {
        let mut tx = Transaction::new();
        tx.begin().unwrap();
        tx.queue(Command::Get { key: b"a".to_vec() }).unwrap();
        tx.queue(Command::Get { key: b"b".to_vec() }).unwrap();

        let queued = tx.take_for_exec().unwrap();
        assert_eq!(
            queued,
            vec![
                Command::Get { key: b"a".to_vec() },
                Command::Get { key: b"b".to_vec() },
            ]
        );
        assert!(!tx.is_active());
    }

    #[test]
    fn discard_without_multi_fails() {
        let mut tx = Transaction::new();
        assert!(matches!(
            tx.discard(),
            Err(RedisError::DiscardWithoutMulti)
        ));
    }
}
