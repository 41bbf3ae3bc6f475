//! Transaction-boundary state machine for one scan of the slot.

use crate::error::{CdcError, CdcResult};
use walindex_protocol::Lsn;

/// Where the scan is relative to the transaction boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxState {
    /// Between transactions.
    Idle,
    /// Inside the transaction with the given xid.
    InTransaction(String),
}

impl TxState {
    /// Returns true if no transaction is open.
    pub fn is_idle(&self) -> bool {
        matches!(self, TxState::Idle)
    }
}

/// Scan state of one cycle.
///
/// Created fresh per cycle. Every processed record, whatever its kind,
/// increments `scanned` by exactly one; at most one transaction is open at
/// a time.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    state: TxState,
    last_lsn: Option<Lsn>,
    scanned: u64,
    transactions: u64,
}

impl TransactionContext {
    /// Creates an idle context with zeroed counters.
    pub fn new() -> Self {
        Self {
            state: TxState::Idle,
            last_lsn: None,
            scanned: 0,
            transactions: 0,
        }
    }

    /// Handles a BEGIN record.
    pub fn open_transaction(&mut self, xid: &str) -> CdcResult<()> {
        self.require_no_open_transaction_for(xid)?;
        self.state = TxState::InTransaction(xid.to_string());
        self.scanned += 1;
        Ok(())
    }

    /// Handles an operation record of transaction `xid`.
    pub fn add_operation(&mut self, xid: &str) -> CdcResult<()> {
        self.check_open(xid)?;
        self.scanned += 1;
        Ok(())
    }

    /// Handles a COMMIT record at `lsn`.
    pub fn close_transaction(&mut self, xid: &str, lsn: Lsn) -> CdcResult<()> {
        self.check_open(xid)?;
        self.state = TxState::Idle;
        self.last_lsn = Some(lsn);
        self.transactions += 1;
        self.scanned += 1;
        Ok(())
    }

    /// Fails if a transaction is still open.
    pub fn require_no_open_transaction(&self) -> CdcResult<()> {
        match &self.state {
            TxState::Idle => Ok(()),
            TxState::InTransaction(open) => Err(CdcError::DanglingTransaction {
                xid: open.clone(),
            }),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> &TxState {
        &self.state
    }

    /// Returns the xid of the open transaction.
    pub fn open_xid(&self) -> Option<&str> {
        match &self.state {
            TxState::Idle => None,
            TxState::InTransaction(xid) => Some(xid),
        }
    }

    /// Returns the LSN of the last COMMIT seen.
    pub fn last_lsn(&self) -> Option<&Lsn> {
        self.last_lsn.as_ref()
    }

    /// Returns the number of records processed.
    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    /// Returns the number of transactions closed.
    pub fn transactions(&self) -> u64 {
        self.transactions
    }

    fn require_no_open_transaction_for(&self, xid: &str) -> CdcResult<()> {
        match &self.state {
            TxState::Idle => Ok(()),
            TxState::InTransaction(open) => Err(CdcError::TransactionAlreadyOpen {
                open_xid: open.clone(),
                xid: xid.to_string(),
            }),
        }
    }

    fn check_open(&self, xid: &str) -> CdcResult<()> {
        match &self.state {
            TxState::Idle => Err(CdcError::NoOpenTransaction {
                xid: xid.to_string(),
            }),
            TxState::InTransaction(open) if open != xid => Err(CdcError::XidMismatch {
                open_xid: open.clone(),
                xid: xid.to_string(),
            }),
            TxState::InTransaction(_) => Ok(()),
        }
    }
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}
