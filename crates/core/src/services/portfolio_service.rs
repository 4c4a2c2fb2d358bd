use chrono::Utc;
use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::asset::{validate_symbol, NewAsset};
use crate::models::portfolio::{Account, Position, Transaction, TransactionType};
use crate::storage::account_repository::{AccountRepository, PositionState};
use crate::storage::asset_repository::AssetRepository;

use super::currency_service::CurrencyService;

/// Quantities below this are treated as zero (float residue after sells).
const QUANTITY_EPSILON: f64 = 1e-9;

/// Manages accounts, cash movements and buy/sell transactions.
///
/// Positions are mutated only here, through [`apply_transaction`](Self::apply_transaction).
/// Each trade is validated against the current ledger and committed in one
/// storage transaction.
pub struct PortfolioService {
    accounts: AccountRepository,
    assets: AssetRepository,
    currency_service: CurrencyService,
    base_currency: String,
    /// Serializes read-validate-commit sequences on the ledger
    ledger_lock: Mutex<()>,
}

impl PortfolioService {
    pub fn new(
        accounts: AccountRepository,
        assets: AssetRepository,
        currency_service: CurrencyService,
        base_currency: impl Into<String>,
    ) -> Self {
        Self {
            accounts,
            assets,
            currency_service,
            base_currency: base_currency.into().trim().to_uppercase(),
            ledger_lock: Mutex::new(()),
        }
    }

    /// Open a new account with a zero cash balance.
    /// `currency` defaults to the configured base currency.
    pub fn create_account(&self, name: &str, currency: Option<&str>) -> Result<Account, CoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::ValidationError("Account name must not be empty".into()));
        }
        let currency = currency
            .map(|c| c.trim().to_uppercase())
            .unwrap_or_else(|| self.base_currency.clone());
        if !self.currency_service.supports(&currency) {
            return Err(CoreError::ValidationError(format!(
                "Unsupported account currency {currency}"
            )));
        }

        let account = Account {
            id: Uuid::new_v4(),
            name: name.to_string(),
            currency,
            cash_balance: 0.0,
            created_at: Utc::now(),
        };
        self.accounts.insert_account(&account)?;
        info!(account = %account.id, name = %account.name, "Created account");
        Ok(account)
    }

    pub fn get_account(&self, id: Uuid) -> Result<Account, CoreError> {
        self.accounts.require_account(id)
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>, CoreError> {
        self.accounts.list_accounts()
    }

    pub fn positions(&self, account_id: Uuid) -> Result<Vec<Position>, CoreError> {
        self.accounts.require_account(account_id)?;
        self.accounts.positions(account_id)
    }

    pub fn transactions(&self, account_id: Uuid) -> Result<Vec<Transaction>, CoreError> {
        self.accounts.require_account(account_id)?;
        self.accounts.transactions(account_id)
    }

    /// Add cash (in the account currency).
    pub fn deposit_cash(&self, account_id: Uuid, amount: f64) -> Result<Account, CoreError> {
        validate_amount(amount, "Deposit")?;
        let _guard = self.ledger_lock.lock();
        let mut account = self.accounts.require_account(account_id)?;
        account.cash_balance += amount;
        self.accounts.set_cash_balance(account_id, account.cash_balance)?;
        Ok(account)
    }

    /// Remove cash (in the account currency). Overdrafts are rejected.
    pub fn withdraw_cash(&self, account_id: Uuid, amount: f64) -> Result<Account, CoreError> {
        validate_amount(amount, "Withdrawal")?;
        let _guard = self.ledger_lock.lock();
        let mut account = self.accounts.require_account(account_id)?;
        if amount > account.cash_balance {
            return Err(CoreError::ValidationError(format!(
                "Cannot withdraw {amount:.2} {}: balance is {:.2}",
                account.currency, account.cash_balance
            )));
        }
        account.cash_balance -= amount;
        self.accounts.set_cash_balance(account_id, account.cash_balance)?;
        Ok(account)
    }

    /// Apply a buy or sell to an account.
    ///
    /// Rules:
    /// - Quantity and price must be positive, fee non-negative
    /// - A buy needs enough cash for `quantity * price + fee` (converted to the account currency)
    /// - A sell can't exceed the held quantity; selling everything removes the position
    /// - Buys update the weighted average cost; sells leave it unchanged
    ///
    /// Returns the resulting position, or `None` when it was closed.
    pub fn apply_transaction(
        &self,
        account_id: Uuid,
        mut transaction: Transaction,
    ) -> Result<Option<Position>, CoreError> {
        transaction.symbol = validate_symbol(&transaction.symbol)?;
        validate_transaction(&transaction)?;

        let _guard = self.ledger_lock.lock();
        let account = self.accounts.require_account(account_id)?;
        let asset = self.assets.ensure(&NewAsset::new(
            &transaction.symbol,
            transaction.market,
            transaction.asset_type,
            &transaction.symbol,
        ))?;
        transaction.asset_type = asset.asset_type;
        let held = self.accounts.position_for_asset(account_id, asset.id)?;

        let (cash_balance, new_state) = match transaction.transaction_type {
            TransactionType::Buy => {
                let cost = self.currency_service.convert(
                    transaction.gross_amount() + transaction.fee,
                    transaction.market.currency(),
                    &account.currency,
                )?;
                if cost > account.cash_balance + QUANTITY_EPSILON {
                    return Err(CoreError::ValidationError(format!(
                        "Insufficient cash: buying {} {} costs {cost:.2} {} but balance is {:.2}",
                        transaction.quantity, transaction.symbol, account.currency, account.cash_balance
                    )));
                }

                let state = match held {
                    Some(held) => {
                        let quantity = held.quantity + transaction.quantity;
                        PositionState {
                            quantity,
                            average_cost: (held.quantity * held.average_cost
                                + transaction.gross_amount())
                                / quantity,
                            current_price: held.current_price,
                        }
                    }
                    None => PositionState {
                        quantity: transaction.quantity,
                        average_cost: transaction.price,
                        current_price: asset.latest_price.filter(|p| *p > 0.0).unwrap_or(transaction.price),
                    },
                };
                ((account.cash_balance - cost).max(0.0), Some(state))
            }
            TransactionType::Sell => {
                let held_quantity = held.map_or(0.0, |h| h.quantity);
                if transaction.quantity > held_quantity + QUANTITY_EPSILON {
                    return Err(CoreError::ValidationError(format!(
                        "Cannot sell {} {}: you only hold {held_quantity}",
                        transaction.quantity, transaction.symbol
                    )));
                }
                let proceeds = self.currency_service.convert(
                    transaction.gross_amount() - transaction.fee,
                    transaction.market.currency(),
                    &account.currency,
                )?;
                if account.cash_balance + proceeds < 0.0 {
                    return Err(CoreError::ValidationError(
                        "Sell fee exceeds proceeds and available cash".into(),
                    ));
                }

                let remaining = held_quantity - transaction.quantity;
                let state = held
                    .filter(|_| remaining > QUANTITY_EPSILON)
                    .map(|h| PositionState {
                        quantity: remaining,
                        ..h
                    });
                (account.cash_balance + proceeds, state)
            }
        };

        self.accounts
            .commit_trade(account_id, asset.id, cash_balance, new_state, &transaction)?;
        info!(
            account = %account_id,
            kind = %transaction.transaction_type,
            symbol = %transaction.symbol,
            quantity = transaction.quantity,
            price = transaction.price,
            "Applied transaction"
        );

        Ok(new_state.map(|state| Position {
            symbol: asset.symbol.clone(),
            market: asset.market,
            name: asset.name.clone(),
            quantity: state.quantity,
            average_cost: state.average_cost,
            current_price: state.current_price,
        }))
    }
}

fn validate_amount(amount: f64, what: &str) -> Result<(), CoreError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(CoreError::ValidationError(format!(
            "{what} amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

fn validate_transaction(transaction: &Transaction) -> Result<(), CoreError> {
    if !transaction.quantity.is_finite() || transaction.quantity <= 0.0 {
        return Err(CoreError::ValidationError(
            "Transaction quantity must be positive".into(),
        ));
    }
    if !transaction.price.is_finite() || transaction.price <= 0.0 {
        return Err(CoreError::ValidationError(
            "Transaction price must be positive".into(),
        ));
    }
    if !transaction.fee.is_finite() || transaction.fee < 0.0 {
        return Err(CoreError::ValidationError(
            "Transaction fee must not be negative".into(),
        ));
    }

    // Allow +1 day tolerance for timezone differences
    let today = Utc::now().date_naive();
    if let Some(tomorrow) = today.succ_opt() {
        if transaction.date > tomorrow {
            return Err(CoreError::ValidationError(format!(
                "Transaction date {} is in the future",
                transaction.date
            )));
        }
    }
    Ok(())
}
