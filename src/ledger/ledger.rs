//! The ledger: single writer of balance accounts.
//!
//! Every mutation goes through [`Ledger::apply`], which locks the target
//! account, checks the account's `(transaction_id, operation_type)`
//! idempotency key, computes the new projection on a copy and commits the
//! copy together with the new entries. Accounts are locked individually so
//! that mutations on different accounts proceed concurrently.
//!
//! When a journal is attached, entries are handed to it through a bounded
//! queue before the commit. A full queue holds the mutation back; a closed
//! one fails it, so no committed entry ever misses the journal.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock, mpsc};

use super::account::{AccountKey, BalanceAccount, ComponentBalance};
use super::entry::{EntryStatus, LedgerEntry, Posting};
use crate::domain::{Currency, EntryId, OperationType, UserId, validate_amount};

/// Capacity of the queue feeding the persistence journal.
const JOURNAL_QUEUE_CAPACITY: usize = 4096;

/// Errors returned by the [`Ledger`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The component's available balance does not cover the amount.
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Available balance at the time of the request.
        available: Decimal,
        /// Requested amount.
        requested: Decimal,
    },

    /// The idempotency key was already applied. Carries the original entry.
    #[error("transaction {} already recorded as {}", original.transaction_id, original.operation_type)]
    DuplicateTransaction {
        /// Entry written by the first application.
        original: Box<LedgerEntry>,
    },

    /// The reservation does not cover the captured or released amount.
    #[error("reservation {reserved} does not cover {requested}")]
    InsufficientReservation {
        /// Reserved balance at the time of the request.
        reserved: Decimal,
        /// Requested amount.
        requested: Decimal,
    },

    /// Amount is zero, negative or too precise.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The account is blocked for new exposure.
    #[error("account {user_id}/{currency} is suspended")]
    AccountSuspended {
        /// Account holder.
        user_id: UserId,
        /// Account currency.
        currency: Currency,
    },

    /// Decimal arithmetic overflowed.
    #[error("balance arithmetic overflow")]
    Overflow,

    /// Stored entries do not line up with the projection.
    #[error("ledger inconsistency: {0}")]
    Inconsistent(String),

    /// The attached journal stopped accepting entries.
    #[error("ledger journal is closed")]
    JournalClosed,
}

/// How a posting moves funds within its component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Movement {
    /// `reserved += a`, requires `available >= a`.
    Reserve,
    /// `reserved -= a`.
    Release,
    /// `amount -= a`, `reserved -= a`.
    Capture,
    /// `amount += a`.
    Credit,
    /// `amount -= a`, requires `available >= a`.
    Debit,
}

impl Movement {
    /// Whether a suspended account refuses this movement. Suspension stops
    /// new exposure; settling a reservation that already exists, and paying
    /// out a won bet, always go through.
    fn blocked_by_suspension(self, operation_type: OperationType) -> bool {
        match self {
            Self::Reserve | Self::Debit => true,
            Self::Credit => operation_type != OperationType::BetCashout,
            Self::Capture | Self::Release => false,
        }
    }

    /// Returns `(change_amount, reserved_change)` for moving `amount` out of
    /// `balance`.
    fn deltas(
        self,
        balance: &ComponentBalance,
        amount: Decimal,
    ) -> Result<(Decimal, Decimal), LedgerError> {
        let available = balance.available();
        match self {
            Self::Reserve | Self::Debit if available < amount => {
                Err(LedgerError::InsufficientFunds {
                    available,
                    requested: amount,
                })
            }
            Self::Release | Self::Capture if balance.reserved < amount => {
                Err(LedgerError::InsufficientReservation {
                    reserved: balance.reserved,
                    requested: amount,
                })
            }
            Self::Reserve => Ok((Decimal::ZERO, amount)),
            Self::Release => Ok((Decimal::ZERO, -amount)),
            Self::Capture => Ok((-amount, -amount)),
            Self::Credit => Ok((amount, Decimal::ZERO)),
            Self::Debit => Ok((-amount, Decimal::ZERO)),
        }
    }
}

/// Entries written by a winning settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WinSettlement {
    /// Capture of the reserved stake (`bet_stake`).
    pub stake: LedgerEntry,
    /// Credit of the payout (`bet_cashout`).
    pub payout: LedgerEntry,
}

/// Result of replaying an account's entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    /// Number of entries replayed.
    pub entries: usize,
    /// Projection rebuilt from the entries.
    pub replayed: BalanceAccount,
}

#[derive(Debug)]
struct AccountBook {
    account: BalanceAccount,
    entries: Vec<LedgerEntry>,
}

/// Idempotency key, scoped to one account.
type TxKey = (AccountKey, String, OperationType);

fn tx_key(user_id: UserId, currency: &Currency, tx: &str, op: OperationType) -> TxKey {
    (AccountKey::new(user_id, currency.clone()), tx.to_string(), op)
}

/// Append-only ledger and balance projection for every account.
#[derive(Debug)]
pub struct Ledger {
    accounts: RwLock<HashMap<AccountKey, Arc<Mutex<AccountBook>>>>,
    transactions: RwLock<HashMap<TxKey, LedgerEntry>>,
    journal: OnceLock<mpsc::Sender<LedgerEntry>>,
}

impl Ledger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            transactions: RwLock::new(HashMap::new()),
            journal: OnceLock::new(),
        }
    }

    /// Moves `amount` from available to reserved, for bet placement.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InsufficientFunds`] when available is short,
    /// [`LedgerError::DuplicateTransaction`] when the key was already used,
    /// plus the validation errors shared by every mutation.
    pub async fn reserve(&self, posting: Posting) -> Result<LedgerEntry, LedgerError> {
        self.apply_one(posting, Movement::Reserve).await
    }

    /// Increases `amount` (winnings, deposits, manual credits).
    ///
    /// # Errors
    ///
    /// [`LedgerError::DuplicateTransaction`] when the key was already used,
    /// plus the validation errors shared by every mutation.
    pub async fn credit(&self, posting: Posting) -> Result<LedgerEntry, LedgerError> {
        self.apply_one(posting, Movement::Credit).await
    }

    /// Forfeits a reservation to the house: `amount` and `reserved` both
    /// drop by the posting amount.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InsufficientReservation`] when less is reserved,
    /// [`LedgerError::DuplicateTransaction`] when the key was already used.
    pub async fn capture(&self, posting: Posting) -> Result<LedgerEntry, LedgerError> {
        self.apply_one(posting, Movement::Capture).await
    }

    /// Returns a reservation to available (cancellations and refunds).
    ///
    /// # Errors
    ///
    /// [`LedgerError::InsufficientReservation`] when less is reserved,
    /// [`LedgerError::DuplicateTransaction`] when the key was already used.
    pub async fn release(&self, posting: Posting) -> Result<LedgerEntry, LedgerError> {
        self.apply_one(posting, Movement::Release).await
    }

    /// Removes available funds (manual operator debit).
    ///
    /// # Errors
    ///
    /// [`LedgerError::InsufficientFunds`] when available is short,
    /// [`LedgerError::DuplicateTransaction`] when the key was already used.
    pub async fn debit(&self, posting: Posting) -> Result<LedgerEntry, LedgerError> {
        self.apply_one(posting, Movement::Debit).await
    }

    /// Settles a won bet under a single account lock: captures the stake
    /// (`bet_stake`) and credits `payout` (`bet_cashout`).
    ///
    /// `stake` describes the original reservation; its operation type is
    /// ignored.
    ///
    /// # Errors
    ///
    /// [`LedgerError::DuplicateTransaction`] with the payout entry when the
    /// bet was already settled, [`LedgerError::InsufficientReservation`]
    /// when the stake is no longer reserved.
    pub async fn settle_win(
        &self,
        stake: &Posting,
        payout: Decimal,
    ) -> Result<WinSettlement, LedgerError> {
        let capture = stake.with_type(OperationType::BetStake);
        let mut credit = stake.with_type(OperationType::BetCashout);
        credit.amount = payout;

        let mut entries = self
            .apply(vec![(capture, Movement::Capture), (credit, Movement::Credit)])
            .await?
            .into_iter();
        match (entries.next(), entries.next()) {
            (Some(stake), Some(payout)) => Ok(WinSettlement { stake, payout }),
            _ => Err(LedgerError::Inconsistent(
                "win settlement produced fewer than two entries".to_string(),
            )),
        }
    }

    /// Returns the account projection, empty for an unknown account.
    pub async fn get_balance(&self, user_id: UserId, currency: &Currency) -> BalanceAccount {
        let key = AccountKey::new(user_id, currency.clone());
        let book = self.accounts.read().await.get(&key).map(Arc::clone);
        match book {
            Some(book) => book.lock().await.account.clone(),
            None => BalanceAccount::empty(user_id, currency.clone()),
        }
    }

    /// Returns one page of a user's entries, newest first, with the total
    /// count. `currency` narrows to a single account.
    pub async fn entries(
        &self,
        user_id: UserId,
        currency: Option<&Currency>,
        offset: usize,
        limit: usize,
    ) -> (Vec<LedgerEntry>, usize) {
        let books: Vec<_> = self
            .accounts
            .read()
            .await
            .iter()
            .filter(|(key, _)| {
                key.user_id == user_id && currency.is_none_or(|c| *c == key.currency)
            })
            .map(|(_, book)| Arc::clone(book))
            .collect();

        let mut all = Vec::new();
        for book in books {
            all.extend(book.lock().await.entries.iter().cloned());
        }
        all.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });
        let total = all.len();
        let page = all.into_iter().skip(offset).take(limit).collect();
        (page, total)
    }

    /// Returns every entry recorded under `transaction_id`.
    pub async fn transaction_entries(&self, transaction_id: &str) -> Vec<LedgerEntry> {
        let mut found: Vec<_> = self
            .transactions
            .read()
            .await
            .iter()
            .filter(|((_, tx, _), _)| tx == transaction_id)
            .map(|(_, entry)| entry.clone())
            .collect();
        found.sort_by_key(|e| e.sequence);
        found
    }

    /// Looks up the entry stored under an account's idempotency key.
    pub async fn find(
        &self,
        user_id: UserId,
        currency: &Currency,
        transaction_id: &str,
        operation_type: OperationType,
    ) -> Option<LedgerEntry> {
        self.transactions
            .read()
            .await
            .get(&tx_key(user_id, currency, transaction_id, operation_type))
            .cloned()
    }

    /// Replays the account's entries from zero and checks the result
    /// against the projection and the entries' own snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Inconsistent`] on the first mismatch.
    pub async fn verify(
        &self,
        user_id: UserId,
        currency: &Currency,
    ) -> Result<Verification, LedgerError> {
        let key = AccountKey::new(user_id, currency.clone());
        let Some(book) = self.accounts.read().await.get(&key).map(Arc::clone) else {
            return Ok(Verification {
                entries: 0,
                replayed: BalanceAccount::empty(user_id, currency.clone()),
            });
        };
        let book = book.lock().await;

        let mut replayed = BalanceAccount::empty(user_id, currency.clone());
        for entry in &book.entries {
            apply_entry(&mut replayed, entry)?;
        }
        replayed.suspended = book.account.suspended;

        if replayed != book.account {
            return Err(LedgerError::Inconsistent(format!(
                "projection {:?} differs from replay {:?}",
                book.account, replayed
            )));
        }
        Ok(Verification {
            entries: book.entries.len(),
            replayed,
        })
    }

    /// Blocks or unblocks new exposure on an account: reservations, debits
    /// and credits other than bet payouts. Stakes already reserved still
    /// settle and refund.
    pub async fn set_suspended(
        &self,
        user_id: UserId,
        currency: &Currency,
        suspended: bool,
    ) -> BalanceAccount {
        let book = self.book(AccountKey::new(user_id, currency.clone())).await;
        let mut book = book.lock().await;
        book.account.suspended = suspended;
        tracing::info!(%user_id, %currency, suspended, "account suspension changed");
        book.account.clone()
    }

    /// Attaches the journal and returns the queue it drains. Every later
    /// mutation waits for room in the queue before it commits. Only the
    /// first call attaches; later calls return `None`.
    pub fn attach_journal(&self) -> Option<mpsc::Receiver<LedgerEntry>> {
        let (tx, rx) = mpsc::channel(JOURNAL_QUEUE_CAPACITY);
        self.journal.set(tx).ok().map(|()| rx)
    }

    /// Re-applies a stored entry at startup. Entries must arrive in
    /// per-account sequence order; already-restored entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Inconsistent`] on a sequence gap or when the
    /// entry's snapshots disagree with the replayed projection.
    pub async fn restore(&self, entry: LedgerEntry) -> Result<(), LedgerError> {
        let book = self
            .book(AccountKey::new(entry.user_id, entry.currency.clone()))
            .await;
        let mut book = book.lock().await;
        if entry.sequence <= book.account.version {
            return Ok(());
        }
        if entry.sequence != book.account.version + 1 {
            return Err(LedgerError::Inconsistent(format!(
                "entry {} has sequence {} but account is at {}",
                entry.id, entry.sequence, book.account.version
            )));
        }
        let mut account = book.account.clone();
        apply_entry(&mut account, &entry)?;
        book.account = account;
        self.transactions.write().await.insert(
            tx_key(
                entry.user_id,
                &entry.currency,
                &entry.transaction_id,
                entry.operation_type,
            ),
            entry.clone(),
        );
        book.entries.push(entry);
        Ok(())
    }

    async fn book(&self, key: AccountKey) -> Arc<Mutex<AccountBook>> {
        if let Some(book) = self.accounts.read().await.get(&key) {
            return Arc::clone(book);
        }
        let mut map = self.accounts.write().await;
        let book = map.entry(key).or_insert_with_key(|key| {
            Arc::new(Mutex::new(AccountBook {
                account: BalanceAccount::empty(key.user_id, key.currency.clone()),
                entries: Vec::new(),
            }))
        });
        Arc::clone(book)
    }

    async fn apply_one(
        &self,
        posting: Posting,
        movement: Movement,
    ) -> Result<LedgerEntry, LedgerError> {
        self.apply(vec![(posting, movement)])
            .await?
            .pop()
            .ok_or_else(|| LedgerError::Inconsistent("mutation produced no entry".to_string()))
    }

    /// Applies postings on one account atomically. All postings must target
    /// the account of the first one.
    async fn apply(
        &self,
        postings: Vec<(Posting, Movement)>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let Some((first, _)) = postings.first() else {
            return Ok(Vec::new());
        };
        let key = AccountKey::new(first.user_id, first.currency.clone());
        for (posting, _) in &postings {
            validate_amount(posting.amount).map_err(LedgerError::InvalidAmount)?;
            if posting.user_id != key.user_id || posting.currency != key.currency {
                return Err(LedgerError::Inconsistent(
                    "postings span more than one account".to_string(),
                ));
            }
        }

        let book = self.book(key.clone()).await;
        let mut book = book.lock().await;

        if book.account.suspended
            && postings
                .iter()
                .any(|(p, m)| m.blocked_by_suspension(p.operation_type))
        {
            return Err(LedgerError::AccountSuspended {
                user_id: key.user_id,
                currency: key.currency,
            });
        }
        if let Some(original) = self.existing(&key, &postings).await {
            return Err(LedgerError::DuplicateTransaction {
                original: Box::new(original),
            });
        }

        let mut account = book.account.clone();
        let now = Utc::now();
        let mut entries = Vec::with_capacity(postings.len());
        for (posting, movement) in postings {
            let balance = account.component_mut(posting.component);
            let (change_amount, reserved_change) = movement.deltas(balance, posting.amount)?;
            balance.amount = balance
                .amount
                .checked_add(change_amount)
                .ok_or(LedgerError::Overflow)?;
            balance.reserved = balance
                .reserved
                .checked_add(reserved_change)
                .ok_or(LedgerError::Overflow)?;
            let (balance_after, reserved_after) = (balance.amount, balance.reserved);
            account.version += 1;
            account.updated_at = Some(now);

            entries.push(LedgerEntry {
                id: EntryId::new(),
                sequence: account.version,
                user_id: posting.user_id,
                currency: posting.currency,
                component: posting.component,
                operation_group: posting.operation_group,
                operation_type: posting.operation_type,
                change_amount,
                reserved_change,
                balance_after,
                reserved_after,
                transaction_id: posting.transaction_id,
                admin_id: posting.admin_id,
                status: EntryStatus::Completed,
                created_at: now,
            });
        }
        account.refresh_totals();

        // The account lock keeps the key check above valid until commit.
        let permits = match self.journal.get() {
            Some(journal) => Some(
                journal
                    .reserve_many(entries.len())
                    .await
                    .map_err(|_| LedgerError::JournalClosed)?,
            ),
            None => None,
        };
        {
            let mut index = self.transactions.write().await;
            for entry in &entries {
                index.insert(
                    tx_key(
                        entry.user_id,
                        &entry.currency,
                        &entry.transaction_id,
                        entry.operation_type,
                    ),
                    entry.clone(),
                );
            }
        }
        if let Some(permits) = permits {
            for (permit, entry) in permits.zip(&entries) {
                permit.send(entry.clone());
            }
        }

        book.account = account;
        book.entries.extend(entries.iter().cloned());
        drop(book);

        for entry in &entries {
            tracing::debug!(
                user_id = %entry.user_id,
                currency = %entry.currency,
                operation = %entry.operation_type,
                tx = %entry.transaction_id,
                change = %entry.change_amount,
                reserved_change = %entry.reserved_change,
                sequence = entry.sequence,
                "ledger entry applied"
            );
        }
        Ok(entries)
    }

    /// Returns the stored entry for the last posting whose key is already
    /// recorded, so a repeated win settlement reports its payout entry.
    async fn existing(
        &self,
        key: &AccountKey,
        postings: &[(Posting, Movement)],
    ) -> Option<LedgerEntry> {
        let index = self.transactions.read().await;
        postings
            .iter()
            .rev()
            .find_map(|(p, _)| {
                index.get(&(key.clone(), p.transaction_id.clone(), p.operation_type))
            })
            .cloned()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies a recorded entry's deltas to `account`, checking its snapshots.
fn apply_entry(account: &mut BalanceAccount, entry: &LedgerEntry) -> Result<(), LedgerError> {
    let balance = account.component_mut(entry.component);
    balance.amount = balance
        .amount
        .checked_add(entry.change_amount)
        .ok_or(LedgerError::Overflow)?;
    balance.reserved = balance
        .reserved
        .checked_add(entry.reserved_change)
        .ok_or(LedgerError::Overflow)?;
    if balance.amount != entry.balance_after || balance.reserved != entry.reserved_after {
        return Err(LedgerError::Inconsistent(format!(
            "entry {} snapshot ({}, {}) does not match replay ({}, {})",
            entry.id, entry.balance_after, entry.reserved_after, balance.amount, balance.reserved
        )));
    }
    if balance.available() < Decimal::ZERO {
        return Err(LedgerError::Inconsistent(format!(
            "entry {} leaves a negative available balance",
            entry.id
        )));
    }
    account.version = entry.sequence;
    account.updated_at = Some(entry.created_at);
    account.refresh_totals();
    Ok(())
}
