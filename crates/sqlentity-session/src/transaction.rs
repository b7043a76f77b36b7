//! One-shot transaction state machine.
//!
//! `INACTIVE -> ACTIVE -> {COMMITTED, ROLLED_BACK}`. Finished transactions
//! are not reused; the session starts a fresh one on the next `begin`.

use crate::flush::FlushResult;
use sqlentity_core::{Connection, Error, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Inactive,
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::RolledBack)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Inactive => write!(f, "INACTIVE"),
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

#[derive(Debug, Default)]
pub struct Transaction {
    state: TransactionState,
    /// Auto-commit setting to put back once the transaction ends.
    restore_auto_commit: bool,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Disable auto-commit and become ACTIVE.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn begin<C: Connection + ?Sized>(&mut self, conn: &mut C) -> Result<()> {
        self.expect_state("begin", TransactionState::Inactive)?;
        self.restore_auto_commit = conn.auto_commit();
        conn.set_auto_commit(false)?;
        self.state = TransactionState::Active;
        tracing::debug!("transaction started");
        Ok(())
    }

    /// Run `flush`, commit the connection and restore auto-commit.
    ///
    /// On failure the transaction stays ACTIVE and the database transaction
    /// stays open; the caller decides whether to roll back.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn commit<C, F>(&mut self, conn: &mut C, flush: F) -> Result<FlushResult>
    where
        C: Connection + ?Sized,
        F: FnOnce(&C) -> Result<FlushResult>,
    {
        self.expect_state("commit", TransactionState::Active)?;
        let outcome = flush(conn).and_then(|result| {
            conn.commit()?;
            Ok(result)
        });
        match outcome {
            Ok(result) => {
                conn.set_auto_commit(self.restore_auto_commit)?;
                self.state = TransactionState::Committed;
                tracing::debug!("transaction committed");
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(error = %e, "commit failed; transaction left open for the caller");
                Err(e)
            }
        }
    }

    /// Roll the connection back and restore auto-commit.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn rollback<C: Connection + ?Sized>(&mut self, conn: &mut C) -> Result<()> {
        self.expect_state("rollback", TransactionState::Active)?;
        conn.rollback()?;
        conn.set_auto_commit(self.restore_auto_commit)?;
        self.state = TransactionState::RolledBack;
        tracing::debug!("transaction rolled back");
        Ok(())
    }

    fn expect_state(&self, operation: &'static str, expected: TransactionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::illegal_state(operation, self.state))
        }
    }
}
